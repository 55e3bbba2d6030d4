//! Deterministic matching. Strategies are data: an ordered list of keyed
//! candidate generators sharing one resolution rule, each running against
//! the residuals left by the previous one.
//!
//! Resolution pairs mutual best candidates only. Candidates indistinguishable
//! under a strategy's key are never paired by it: every record in the tie
//! stays residual and is remembered for the exception classifier. Together
//! with `BTreeMap` grouping this makes the output independent of input row
//! order.

use crate::core::config::RunConfig;
use crate::core::error::Warning;
use crate::core::model::{
    AppliedTolerances, CanonicalTxn, Match, Strategy, TxnId,
};
use chrono::{Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, BTreeSet};

pub struct ExactOutput {
    pub matches: Vec<Match>,
    pub residuals_gl: Vec<CanonicalTxn>,
    pub residuals_bank: Vec<CanonicalTxn>,
    /// Residuals that were part of an unresolved tie under some strategy.
    pub ambiguous: BTreeSet<TxnId>,
    pub warnings: Vec<Warning>,
}

/// A candidate pairing, ranked by how close it is on the dimensions the
/// strategy's key leaves open. Lower ranks are better.
#[derive(Debug, Clone, Copy)]
struct Edge {
    gl: usize,
    bank: usize,
    rank: (Decimal, i64),
}

pub fn match_exact(
    gl: Vec<CanonicalTxn>,
    bank: Vec<CanonicalTxn>,
    config: &RunConfig,
) -> ExactOutput {
    let tolerance = config.exact.amount_tolerance;
    let window = config.exact.date_tolerance_days;

    let mut gl_pool = gl;
    let mut bank_pool = bank;
    let mut matches = Vec::new();
    let mut ambiguous: BTreeSet<TxnId> = BTreeSet::new();
    let mut warnings = Vec::new();

    for &strategy in &config.exact.strategies {
        let edges = match strategy {
            Strategy::ReferenceExact => by_reference(&gl_pool, &bank_pool, tolerance),
            Strategy::AmountDateExact => by_amount_date(&gl_pool, &bank_pool, tolerance, false),
            Strategy::AmountDateDesc => by_amount_date(&gl_pool, &bank_pool, tolerance, true),
            Strategy::CompositeKey => by_composite(&gl_pool, &bank_pool, tolerance),
            Strategy::AmountDateWindow => {
                by_amount_date_window(&gl_pool, &bank_pool, tolerance, window)
            }
            Strategy::Fuzzy => continue,
        };

        let (pairs, tied) = resolve(&edges, &gl_pool, &bank_pool);
        if !tied.is_empty() {
            warnings.push(Warning::Ambiguity {
                strategy,
                records: tied.iter().copied().collect(),
            });
            ambiguous.extend(tied);
        }
        if pairs.is_empty() {
            continue;
        }

        let date_tolerance_days = match strategy {
            Strategy::AmountDateWindow => window,
            _ => 0,
        };
        let mut emitted: Vec<Match> = pairs
            .iter()
            .map(|&(g, b)| Match {
                gl: gl_pool[g].txn_id,
                bank: bank_pool[b].txn_id,
                strategy,
                confidence: 1.0,
                tolerances_applied: AppliedTolerances {
                    amount_tolerance: tolerance,
                    date_tolerance_days,
                },
            })
            .collect();
        emitted.sort_by_key(|m| (m.gl, m.bank));
        log::info!("{strategy}: {} pairs", emitted.len());
        matches.extend(emitted);

        let matched_gl: BTreeSet<usize> = pairs.iter().map(|&(g, _)| g).collect();
        let matched_bank: BTreeSet<usize> = pairs.iter().map(|&(_, b)| b).collect();
        gl_pool = keep_unmatched(gl_pool, &matched_gl);
        bank_pool = keep_unmatched(bank_pool, &matched_bank);
    }

    // A record paired by a later strategy is no longer ambiguous.
    let matched: BTreeSet<TxnId> = matches
        .iter()
        .flat_map(|m| [m.gl, m.bank])
        .collect();
    ambiguous.retain(|id| !matched.contains(id));

    ExactOutput {
        matches,
        residuals_gl: gl_pool,
        residuals_bank: bank_pool,
        ambiguous,
        warnings,
    }
}

fn keep_unmatched(pool: Vec<CanonicalTxn>, matched: &BTreeSet<usize>) -> Vec<CanonicalTxn> {
    pool.into_iter()
        .enumerate()
        .filter(|(i, _)| !matched.contains(i))
        .map(|(_, txn)| txn)
        .collect()
}

/// The amount comparison is always against the sign-inverted counterpart: a
/// GL debit of +100 pairs with a bank outflow of −100.
fn amount_delta(gl: &CanonicalTxn, bank: &CanonicalTxn) -> Decimal {
    (gl.amount + bank.amount).abs()
}

fn date_delta(gl: &CanonicalTxn, bank: &CanonicalTxn) -> i64 {
    (gl.date - bank.date).num_days().abs()
}

fn rank(gl: &CanonicalTxn, bank: &CanonicalTxn) -> (Decimal, i64) {
    (amount_delta(gl, bank), date_delta(gl, bank))
}

// ---------------------------------------------------------------------------
// Candidate generation
// ---------------------------------------------------------------------------

fn by_reference(gl: &[CanonicalTxn], bank: &[CanonicalTxn], tolerance: Decimal) -> Vec<Edge> {
    let mut groups: BTreeMap<&str, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, txn) in gl.iter().enumerate() {
        if !txn.reference.is_empty() {
            groups.entry(&txn.reference).or_default().0.push(i);
        }
    }
    for (i, txn) in bank.iter().enumerate() {
        if !txn.reference.is_empty() {
            groups.entry(&txn.reference).or_default().1.push(i);
        }
    }

    let mut edges = Vec::new();
    for (gs, bs) in groups.values() {
        for &g in gs {
            for &b in bs {
                if amount_delta(&gl[g], &bank[b]) <= tolerance {
                    edges.push(Edge {
                        gl: g,
                        bank: b,
                        rank: rank(&gl[g], &bank[b]),
                    });
                }
            }
        }
    }
    edges
}

/// Bank records indexed by a grouping key, sorted by sign-inverted amount so
/// the tolerance band is a binary-searchable range.
fn amount_index<K: Ord>(
    bank: &[CanonicalTxn],
    key: impl Fn(&CanonicalTxn) -> K,
) -> BTreeMap<K, Vec<(Decimal, usize)>> {
    let mut index: BTreeMap<K, Vec<(Decimal, usize)>> = BTreeMap::new();
    for (i, txn) in bank.iter().enumerate() {
        index.entry(key(txn)).or_default().push((-txn.amount, i));
    }
    for entries in index.values_mut() {
        entries.sort();
    }
    index
}

fn amounts_in_band(
    entries: &[(Decimal, usize)],
    target: Decimal,
    tolerance: Decimal,
) -> impl Iterator<Item = usize> + '_ {
    let lo = entries.partition_point(|(a, _)| *a < target - tolerance);
    let hi = entries.partition_point(|(a, _)| *a <= target + tolerance);
    entries[lo..hi].iter().map(|&(_, i)| i)
}

fn by_amount_date(
    gl: &[CanonicalTxn],
    bank: &[CanonicalTxn],
    tolerance: Decimal,
    require_description: bool,
) -> Vec<Edge> {
    let index = amount_index(bank, |t| {
        (
            t.date,
            require_description.then(|| t.description.clone()),
        )
    });
    let mut edges = Vec::new();
    for (g, txn) in gl.iter().enumerate() {
        let key = (
            txn.date,
            require_description.then(|| txn.description.clone()),
        );
        if let Some(entries) = index.get(&key) {
            for b in amounts_in_band(entries, txn.amount, tolerance) {
                edges.push(Edge {
                    gl: g,
                    bank: b,
                    rank: rank(txn, &bank[b]),
                });
            }
        }
    }
    edges
}

fn first_token(description: &str) -> &str {
    description.split(' ').next().unwrap_or("")
}

fn whole_units(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn by_composite(gl: &[CanonicalTxn], bank: &[CanonicalTxn], tolerance: Decimal) -> Vec<Edge> {
    type Key = (NaiveDate, Decimal, String, String);
    let composite = |txn: &CanonicalTxn, invert: bool| -> Key {
        let amount = if invert { -txn.amount } else { txn.amount };
        (
            txn.date,
            whole_units(amount),
            txn.reference.clone(),
            first_token(&txn.description).to_string(),
        )
    };

    let mut groups: BTreeMap<Key, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, txn) in gl.iter().enumerate() {
        groups.entry(composite(txn, false)).or_default().0.push(i);
    }
    for (i, txn) in bank.iter().enumerate() {
        groups.entry(composite(txn, true)).or_default().1.push(i);
    }

    let mut edges = Vec::new();
    for (gs, bs) in groups.values() {
        for &g in gs {
            for &b in bs {
                if amount_delta(&gl[g], &bank[b]) <= tolerance {
                    edges.push(Edge {
                        gl: g,
                        bank: b,
                        rank: rank(&gl[g], &bank[b]),
                    });
                }
            }
        }
    }
    edges
}

fn by_amount_date_window(
    gl: &[CanonicalTxn],
    bank: &[CanonicalTxn],
    tolerance: Decimal,
    window_days: u32,
) -> Vec<Edge> {
    let index = amount_index(bank, |t| t.date);
    let mut edges = Vec::new();
    for (g, txn) in gl.iter().enumerate() {
        for offset in -(window_days as i64)..=window_days as i64 {
            let date = txn.date + Duration::days(offset);
            if let Some(entries) = index.get(&date) {
                for b in amounts_in_band(entries, txn.amount, tolerance) {
                    edges.push(Edge {
                        gl: g,
                        bank: b,
                        rank: rank(txn, &bank[b]),
                    });
                }
            }
        }
    }
    edges
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Pair mutual best candidates. A record whose best candidates tie on rank
/// blocks itself and the tied counterparts; none of them pair here.
fn resolve(
    edges: &[Edge],
    gl: &[CanonicalTxn],
    bank: &[CanonicalTxn],
) -> (Vec<(usize, usize)>, BTreeSet<TxnId>) {
    let mut by_gl: BTreeMap<usize, Vec<&Edge>> = BTreeMap::new();
    let mut by_bank: BTreeMap<usize, Vec<&Edge>> = BTreeMap::new();
    for edge in edges {
        by_gl.entry(edge.gl).or_default().push(edge);
        by_bank.entry(edge.bank).or_default().push(edge);
    }

    let mut tied: BTreeSet<TxnId> = BTreeSet::new();
    let mut best_gl: BTreeMap<usize, usize> = BTreeMap::new();
    for (&g, list) in by_gl.iter_mut() {
        list.sort_by_key(|e| (e.rank, bank[e.bank].txn_id));
        if list.len() > 1 && list[1].rank == list[0].rank {
            tied.insert(gl[g].txn_id);
            for edge in list.iter().take_while(|e| e.rank == list[0].rank) {
                tied.insert(bank[edge.bank].txn_id);
            }
        } else {
            best_gl.insert(g, list[0].bank);
        }
    }

    let mut best_bank: BTreeMap<usize, usize> = BTreeMap::new();
    for (&b, list) in by_bank.iter_mut() {
        list.sort_by_key(|e| (e.rank, gl[e.gl].txn_id));
        if list.len() > 1 && list[1].rank == list[0].rank {
            tied.insert(bank[b].txn_id);
            for edge in list.iter().take_while(|e| e.rank == list[0].rank) {
                tied.insert(gl[edge.gl].txn_id);
            }
        } else {
            best_bank.insert(b, list[0].gl);
        }
    }

    let mut pairs = Vec::new();
    for (&g, &b) in &best_gl {
        if tied.contains(&gl[g].txn_id) || tied.contains(&bank[b].txn_id) {
            continue;
        }
        if best_bank.get(&b) == Some(&g) {
            pairs.push((g, b));
        }
    }
    (pairs, tied)
}
