//! Probabilistic matching of the residuals the exact strategies left behind.
//!
//! Candidates are generated inside amount/date blocks (with neighbour-bucket
//! probing, so a counterpart within one bucket width is never missed), scored
//! as a weighted sum of per-field similarities, then assigned greedily in
//! descending confidence. A transaction whose best two available candidates
//! sit within `confidence_epsilon` of each other never auto-matches: the
//! contested pairings are downgraded to suggestions.

use crate::core::config::{FuzzyConfig, RunConfig};
use crate::core::error::Warning;
use crate::core::model::{
    AppliedTolerances, CanonicalTxn, Match, MatchEvidence, MatchSuggestion, Strategy, TxnId,
};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

pub struct FuzzyOutput {
    pub matches: Vec<Match>,
    pub suggestions: Vec<MatchSuggestion>,
    pub residuals_gl: Vec<CanonicalTxn>,
    pub residuals_bank: Vec<CanonicalTxn>,
    /// Records whose top candidates tied within the epsilon.
    pub ambiguous: BTreeSet<TxnId>,
    /// Records that skipped fuzzy matching on the quality gate.
    pub gated: usize,
    pub warnings: Vec<Warning>,
}

/// Similarity of one pairing, with the per-field contributions kept as
/// evidence.
pub fn score_pair(gl: &CanonicalTxn, bank: &CanonicalTxn, config: &FuzzyConfig) -> (f64, MatchEvidence) {
    let delta = (gl.amount + bank.amount).abs();
    let ratio = (delta / config.amount_scale).to_f64().unwrap_or(f64::INFINITY);
    let amount = (1.0 - ratio.min(1.0)).max(0.0);

    let days = (gl.date - bank.date).num_days().abs() as f64;
    let date = (1.0 - days / config.date_scale).max(0.0);

    let description = text_similarity(&gl.description, &bank.description);
    let reference = if !gl.reference.is_empty() && !bank.reference.is_empty() {
        if gl.reference == bank.reference {
            1.0
        } else {
            strsim::normalized_levenshtein(&gl.reference, &bank.reference)
        }
    } else {
        0.5
    };

    let weights = config.weights;
    let confidence = (weights.amount * amount
        + weights.date * date
        + weights.description * description
        + weights.reference * reference)
        .clamp(0.0, 1.0);
    (
        confidence,
        MatchEvidence {
            amount,
            date,
            description,
            reference,
        },
    )
}

/// Normalised Levenshtein when both sides carry text; a neutral 0.5 when
/// either side is empty, since absence is no evidence either way.
fn text_similarity(left: &str, right: &str) -> f64 {
    if left.is_empty() || right.is_empty() {
        0.5
    } else {
        strsim::normalized_levenshtein(left, right)
    }
}

fn amount_bucket(amount: Decimal, quantum: Decimal) -> i64 {
    (amount / quantum).round().to_i64().unwrap_or(0)
}

fn date_bucket(date: NaiveDate, window_days: u32) -> i64 {
    let width = window_days.max(1) as i64;
    (date.num_days_from_ce() as i64).div_euclid(width)
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    gl: usize,
    bank: usize,
    gl_id: TxnId,
    bank_id: TxnId,
    confidence: f64,
    evidence: MatchEvidence,
}

pub fn match_fuzzy(
    gl: Vec<CanonicalTxn>,
    bank: Vec<CanonicalTxn>,
    config: &RunConfig,
) -> FuzzyOutput {
    let fuzzy = &config.fuzzy;
    let min_quality = config.min_quality_for_fuzzy.0;

    let eligible = |txn: &CanonicalTxn| txn.quality.overall >= min_quality;
    let gated = gl.iter().chain(bank.iter()).filter(|t| !eligible(t)).count();

    // Block eligible bank records on (sign-inverted amount, date) buckets.
    let mut blocks: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, txn) in bank.iter().enumerate() {
        if eligible(txn) {
            let key = (
                amount_bucket(-txn.amount, fuzzy.amount_bucket),
                date_bucket(txn.date, fuzzy.date_window_days),
            );
            blocks.entry(key).or_default().push(i);
        }
    }

    // Candidate generation with ±1 bucket probing on both axes.
    let mut candidates: Vec<Candidate> = Vec::new();
    for (g, txn) in gl.iter().enumerate() {
        if !eligible(txn) {
            continue;
        }
        let a = amount_bucket(txn.amount, fuzzy.amount_bucket);
        let d = date_bucket(txn.date, fuzzy.date_window_days);
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        for da in -1..=1 {
            for dd in -1..=1 {
                if let Some(bucket) = blocks.get(&(a + da, d + dd)) {
                    seen.extend(bucket.iter().copied());
                }
            }
        }
        for b in seen {
            let (confidence, evidence) = score_pair(txn, &bank[b], fuzzy);
            if confidence >= fuzzy.review_required_threshold {
                candidates.push(Candidate {
                    gl: g,
                    bank: b,
                    gl_id: txn.txn_id,
                    bank_id: bank[b].txn_id,
                    confidence,
                    evidence,
                });
            }
        }
    }

    candidates.sort_by(|x, y| {
        y.confidence
            .total_cmp(&x.confidence)
            .then(x.gl_id.cmp(&y.gl_id))
            .then(x.bank_id.cmp(&y.bank_id))
    });

    // Per-transaction candidate lists, in descending-confidence order.
    let mut per_txn: BTreeMap<TxnId, Vec<usize>> = BTreeMap::new();
    for (i, c) in candidates.iter().enumerate() {
        per_txn.entry(c.gl_id).or_default().push(i);
        per_txn.entry(c.bank_id).or_default().push(i);
    }

    let mut consumed: BTreeSet<TxnId> = BTreeSet::new();
    let mut blocked: BTreeSet<TxnId> = BTreeSet::new();
    let mut ambiguous: BTreeSet<TxnId> = BTreeSet::new();
    let mut matches = Vec::new();
    let mut suggestions = Vec::new();

    // Candidates within epsilon of `current` for `id`, other than `current`
    // itself, that are still live on their far end.
    let tied_alternatives = |id: TxnId,
                             current: usize,
                             consumed: &BTreeSet<TxnId>|
     -> Vec<usize> {
        let mut tied = Vec::new();
        for &other in per_txn.get(&id).into_iter().flatten() {
            if other == current {
                continue;
            }
            let candidate = &candidates[other];
            let far_end = if candidate.gl_id == id {
                candidate.bank_id
            } else {
                candidate.gl_id
            };
            if consumed.contains(&far_end) {
                continue;
            }
            if candidates[current].confidence - candidate.confidence <= fuzzy.confidence_epsilon {
                tied.push(other);
            } else {
                break; // lists are sorted descending
            }
        }
        tied
    };

    for i in 0..candidates.len() {
        let c = candidates[i];
        if consumed.contains(&c.gl_id) || consumed.contains(&c.bank_id) {
            continue;
        }

        let gl_ties = tied_alternatives(c.gl_id, i, &consumed);
        let bank_ties = tied_alternatives(c.bank_id, i, &consumed);
        let contested = !gl_ties.is_empty() || !bank_ties.is_empty();

        if contested {
            if !gl_ties.is_empty() {
                blocked.insert(c.gl_id);
                ambiguous.insert(c.gl_id);
                ambiguous.insert(c.bank_id);
                for &t in &gl_ties {
                    ambiguous.insert(candidates[t].bank_id);
                }
            }
            if !bank_ties.is_empty() {
                blocked.insert(c.bank_id);
                ambiguous.insert(c.bank_id);
                ambiguous.insert(c.gl_id);
                for &t in &bank_ties {
                    ambiguous.insert(candidates[t].gl_id);
                }
            }
            suggestions.push(suggestion(&c));
            continue;
        }

        if c.confidence >= fuzzy.auto_match_threshold
            && !blocked.contains(&c.gl_id)
            && !blocked.contains(&c.bank_id)
        {
            consumed.insert(c.gl_id);
            consumed.insert(c.bank_id);
            matches.push(Match {
                gl: c.gl_id,
                bank: c.bank_id,
                strategy: Strategy::Fuzzy,
                confidence: c.confidence,
                tolerances_applied: AppliedTolerances {
                    amount_tolerance: fuzzy.amount_bucket,
                    date_tolerance_days: fuzzy.date_window_days,
                },
            });
        } else {
            suggestions.push(suggestion(&c));
        }
    }

    let mut warnings = Vec::new();
    ambiguous.retain(|id| !consumed.contains(id));
    if !ambiguous.is_empty() {
        warnings.push(Warning::Ambiguity {
            strategy: Strategy::Fuzzy,
            records: ambiguous.iter().copied().collect(),
        });
    }
    if gated > 0 {
        log::debug!("fuzzy: {gated} records below quality gate");
    }
    log::info!(
        "fuzzy: {} matches, {} suggestions from {} candidates",
        matches.len(),
        suggestions.len(),
        candidates.len()
    );

    let residuals_gl: Vec<CanonicalTxn> = gl
        .into_iter()
        .filter(|t| !consumed.contains(&t.txn_id))
        .collect();
    let residuals_bank: Vec<CanonicalTxn> = bank
        .into_iter()
        .filter(|t| !consumed.contains(&t.txn_id))
        .collect();

    FuzzyOutput {
        matches,
        suggestions,
        residuals_gl,
        residuals_bank,
        ambiguous,
        gated,
        warnings,
    }
}

fn suggestion(c: &Candidate) -> MatchSuggestion {
    MatchSuggestion {
        gl: c.gl_id,
        bank: c.bank_id,
        confidence: c.confidence,
        evidence: c.evidence,
    }
}
