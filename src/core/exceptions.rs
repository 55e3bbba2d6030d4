//! Classification of residuals. Rules run in a fixed order and the first
//! hit decides the category; every residual yields exactly one exception.

use crate::core::config::RunConfig;
use crate::core::model::{
    CanonicalTxn, Exception, ExceptionCategory, MatchSuggestion, Priority, TxnId,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

pub fn classify(
    residuals_gl: &[CanonicalTxn],
    residuals_bank: &[CanonicalTxn],
    suggestions: &[MatchSuggestion],
    ambiguous: &BTreeSet<TxnId>,
    reference_date: NaiveDate,
    config: &RunConfig,
) -> Vec<Exception> {
    let duplicates_gl = duplicate_clusters(residuals_gl, config);
    let duplicates_bank = duplicate_clusters(residuals_bank, config);

    let mut by_txn_suggestions: BTreeMap<TxnId, Vec<&MatchSuggestion>> = BTreeMap::new();
    for suggestion in suggestions {
        by_txn_suggestions
            .entry(suggestion.gl)
            .or_default()
            .push(suggestion);
        by_txn_suggestions
            .entry(suggestion.bank)
            .or_default()
            .push(suggestion);
    }

    let mut exceptions = Vec::new();
    for (own, other, duplicates) in [
        (residuals_gl, residuals_bank, &duplicates_gl),
        (residuals_bank, residuals_gl, &duplicates_bank),
    ] {
        for txn in own {
            let (category, rationale) =
                categorize(txn, other, duplicates, ambiguous, config);
            let mut attached: Vec<MatchSuggestion> = by_txn_suggestions
                .get(&txn.txn_id)
                .into_iter()
                .flatten()
                .map(|s| (*s).clone())
                .collect();
            attached.sort_by(|a, b| {
                b.confidence
                    .total_cmp(&a.confidence)
                    .then(a.counterpart(txn.txn_id).cmp(&b.counterpart(txn.txn_id)))
            });
            attached.truncate(config.exceptions.max_suggestions);

            exceptions.push(Exception {
                txn_id: txn.txn_id,
                category,
                priority: priority(txn, reference_date, config),
                suggestions: attached,
                rationale,
            });
        }
    }

    // Priority first, then money at stake, then a stable id order.
    let amounts: BTreeMap<TxnId, Decimal> = residuals_gl
        .iter()
        .chain(residuals_bank.iter())
        .map(|t| (t.txn_id, t.amount.abs()))
        .collect();
    exceptions.sort_by_key(|e| (Reverse(e.priority), Reverse(amounts[&e.txn_id]), e.txn_id));
    exceptions
}

fn categorize(
    txn: &CanonicalTxn,
    other: &[CanonicalTxn],
    duplicates: &BTreeMap<TxnId, Vec<TxnId>>,
    ambiguous: &BTreeSet<TxnId>,
    config: &RunConfig,
) -> (ExceptionCategory, String) {
    let exact_tolerance = config.exact.amount_tolerance;
    let date_tolerance = config.exact.date_tolerance_days as i64;
    let timing_window = config.exceptions.timing_window_days as i64;
    let mismatch_tolerance = config.exceptions.amount_mismatch_tolerance;

    if ambiguous.contains(&txn.txn_id) {
        return (
            ExceptionCategory::AmbiguousMatch,
            "tied with indistinguishable counterparts during matching".into(),
        );
    }

    if let Some(others) = duplicates.get(&txn.txn_id) {
        let listed: Vec<String> = others.iter().map(|id| id.to_string()).collect();
        return (
            ExceptionCategory::DuplicateSuspected,
            format!("near-duplicate of {} within the same source", listed.join(", ")),
        );
    }

    if txn.quality.overall < config.min_quality_for_fuzzy.0 {
        return (
            ExceptionCategory::DataQuality,
            format!(
                "quality {:.2} below the fuzzy gate {:.2}",
                txn.quality.overall, config.min_quality_for_fuzzy.0
            ),
        );
    }

    // Closest same-amount counterpart beyond the exact window but inside the
    // timing window.
    let timing = other
        .iter()
        .filter(|c| (txn.amount + c.amount).abs() <= exact_tolerance)
        .map(|c| ((txn.date - c.date).num_days().abs(), c.txn_id))
        .filter(|&(lag, _)| lag > date_tolerance && lag <= timing_window)
        .min();
    if let Some((lag, counterpart)) = timing {
        return (
            ExceptionCategory::TimingDifference,
            format!("{counterpart} matches the amount with a {lag}-day lag"),
        );
    }

    let near_amount = |c: &CanonicalTxn| -> bool {
        let delta = (txn.amount + c.amount).abs();
        let scale = txn.amount.abs().max(c.amount.abs());
        delta <= mismatch_tolerance * scale
    };

    let mismatch = other
        .iter()
        .filter(|c| c.date == txn.date && near_amount(c))
        .map(|c| ((txn.amount + c.amount).abs(), c.txn_id))
        .min();
    if let Some((delta, counterpart)) = mismatch {
        return (
            ExceptionCategory::AmountMismatch,
            format!("{counterpart} on the same date differs by {delta:.2}"),
        );
    }

    let plausible = other
        .iter()
        .any(|c| near_amount(c) && (txn.date - c.date).num_days().abs() <= timing_window);
    if !plausible {
        return (
            ExceptionCategory::MissingCounterpart,
            format!("no plausible counterpart in {}", txn.source.other()),
        );
    }

    (
        ExceptionCategory::Unclassified,
        "a counterpart is close on amount and date but fits no rule".into(),
    )
}

/// Cluster one source's residuals on (amount, description) with dates within
/// the configured slack; members of clusters of two or more are suspected
/// duplicates.
fn duplicate_clusters(
    residuals: &[CanonicalTxn],
    config: &RunConfig,
) -> BTreeMap<TxnId, Vec<TxnId>> {
    let slack = config.exceptions.duplicate_date_epsilon_days as i64;
    let mut groups: BTreeMap<(Decimal, &str), Vec<(NaiveDate, TxnId)>> = BTreeMap::new();
    for txn in residuals {
        groups
            .entry((txn.amount, txn.description.as_str()))
            .or_default()
            .push((txn.date, txn.txn_id));
    }

    let mut clusters: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
    for members in groups.values_mut() {
        members.sort();
        let mut start = 0;
        for i in 1..=members.len() {
            let chain_broken = i == members.len()
                || (members[i].0 - members[i - 1].0).num_days() > slack;
            if chain_broken {
                if i - start >= 2 {
                    let cluster: Vec<TxnId> = members[start..i].iter().map(|&(_, id)| id).collect();
                    for &(_, id) in &members[start..i] {
                        clusters.insert(
                            id,
                            cluster.iter().copied().filter(|&c| c != id).collect(),
                        );
                    }
                }
                start = i;
            }
        }
    }
    clusters
}

fn priority(txn: &CanonicalTxn, reference_date: NaiveDate, config: &RunConfig) -> Priority {
    let amount = txn.amount.abs();
    let age = (reference_date - txn.date).num_days().max(0);
    let high_amount = config.exceptions.high_amount_threshold;
    let aging = config.exceptions.aging_threshold_days as i64;

    if amount >= high_amount || age >= aging {
        Priority::High
    } else if amount * Decimal::TWO >= high_amount || age * 2 >= aging {
        Priority::Med
    } else {
        Priority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{QualityScore, Source};
    use rust_decimal_macros::dec;

    fn txn(
        source: Source,
        row: usize,
        date: &str,
        amount: Decimal,
        desc: &str,
        reference: &str,
    ) -> CanonicalTxn {
        CanonicalTxn {
            txn_id: TxnId::new(source, row),
            source,
            row_index: row,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            amount,
            description: desc.into(),
            reference: reference.into(),
            quality: QualityScore::default(),
        }
    }

    fn gl(row: usize, date: &str, amount: Decimal) -> CanonicalTxn {
        txn(Source::Gl, row, date, amount, "desc", "")
    }

    fn bank(row: usize, date: &str, amount: Decimal) -> CanonicalTxn {
        txn(Source::Bank, row, date, amount, "desc", "")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn classify_simple(
        residuals_gl: &[CanonicalTxn],
        residuals_bank: &[CanonicalTxn],
    ) -> Vec<Exception> {
        classify(
            residuals_gl,
            residuals_bank,
            &[],
            &BTreeSet::new(),
            date("2025-06-30"),
            &RunConfig::default(),
        )
    }

    #[test]
    fn every_residual_gets_exactly_one_exception() {
        let exceptions = classify_simple(
            &[gl(0, "2025-06-01", dec!(10)), gl(1, "2025-06-02", dec!(20))],
            &[bank(0, "2025-06-03", dec!(-30))],
        );
        assert_eq!(exceptions.len(), 3);
        let ids: BTreeSet<TxnId> = exceptions.iter().map(|e| e.txn_id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn ambiguity_hint_wins_over_everything() {
        let mut hints = BTreeSet::new();
        hints.insert(TxnId::new(Source::Gl, 0));
        let exceptions = classify(
            &[gl(0, "2025-06-01", dec!(10)), gl(1, "2025-06-01", dec!(10))],
            &[],
            &[],
            &hints,
            date("2025-06-30"),
            &RunConfig::default(),
        );
        let flagged = exceptions
            .iter()
            .find(|e| e.txn_id == TxnId::new(Source::Gl, 0))
            .unwrap();
        assert_eq!(flagged.category, ExceptionCategory::AmbiguousMatch);
        // the twin without a hint classifies as a duplicate
        let twin = exceptions
            .iter()
            .find(|e| e.txn_id == TxnId::new(Source::Gl, 1))
            .unwrap();
        assert_eq!(twin.category, ExceptionCategory::DuplicateSuspected);
    }

    #[test]
    fn within_source_twins_are_duplicates() {
        let exceptions = classify_simple(
            &[gl(0, "2025-06-01", dec!(10)), gl(1, "2025-06-01", dec!(10))],
            &[],
        );
        for e in &exceptions {
            assert_eq!(e.category, ExceptionCategory::DuplicateSuspected);
            assert!(e.rationale.contains("GL:"));
        }
    }

    #[test]
    fn low_quality_residuals_classify_as_data_quality() {
        let mut poor = gl(0, "2025-06-01", dec!(10));
        poor.quality = QualityScore {
            completeness: 0.25,
            validity: 1.0,
            consistency: 0.5,
            overall: 0.4,
        };
        let exceptions = classify_simple(&[poor], &[]);
        assert_eq!(exceptions[0].category, ExceptionCategory::DataQuality);
    }

    #[test]
    fn same_amount_with_lag_is_a_timing_difference() {
        let exceptions = classify_simple(
            &[gl(0, "2025-01-15", dec!(250.00))],
            &[bank(0, "2025-01-18", dec!(-250.00))],
        );
        assert_eq!(exceptions.len(), 2);
        for e in &exceptions {
            assert_eq!(e.category, ExceptionCategory::TimingDifference, "{e:?}");
            assert!(e.rationale.contains("3-day lag"));
        }
    }

    #[test]
    fn lag_beyond_the_window_is_not_timing() {
        let exceptions = classify_simple(
            &[gl(0, "2025-01-15", dec!(250.00))],
            &[bank(0, "2025-03-15", dec!(-250.00))],
        );
        for e in &exceptions {
            assert_eq!(e.category, ExceptionCategory::MissingCounterpart);
        }
    }

    #[test]
    fn near_amount_same_date_is_an_amount_mismatch() {
        let exceptions = classify_simple(
            &[gl(0, "2025-03-10", dec!(99.00))],
            &[bank(0, "2025-03-10", dec!(-100.00))],
        );
        for e in &exceptions {
            assert_eq!(e.category, ExceptionCategory::AmountMismatch);
        }
    }

    #[test]
    fn near_amount_near_date_is_unclassified() {
        // 3% off and 2 days late: no rule fits, but a counterpart exists.
        let exceptions = classify_simple(
            &[gl(0, "2025-03-10", dec!(97.00))],
            &[bank(0, "2025-03-12", dec!(-100.00))],
        );
        for e in &exceptions {
            assert_eq!(e.category, ExceptionCategory::Unclassified);
        }
    }

    #[test]
    fn no_counterpart_at_all_is_missing() {
        let exceptions = classify_simple(&[], &[bank(0, "2025-03-10", dec!(-100.00))]);
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].category,
            ExceptionCategory::MissingCounterpart
        );
        assert!(exceptions[0].rationale.contains("GL"));
    }

    #[test]
    fn priority_tiers() {
        let config = RunConfig::default();
        let reference = date("2025-06-30");
        // amount over threshold
        assert_eq!(
            priority(&gl(0, "2025-06-29", dec!(10000)), reference, &config),
            Priority::High
        );
        // age over threshold
        assert_eq!(
            priority(&gl(0, "2025-01-01", dec!(5)), reference, &config),
            Priority::High
        );
        // amount within 50%
        assert_eq!(
            priority(&gl(0, "2025-06-29", dec!(5000)), reference, &config),
            Priority::Med
        );
        // age within 50%
        assert_eq!(
            priority(&gl(0, "2025-06-10", dec!(5)), reference, &config),
            Priority::Med
        );
        assert_eq!(
            priority(&gl(0, "2025-06-29", dec!(5)), reference, &config),
            Priority::Low
        );
    }

    #[test]
    fn exceptions_are_ordered_by_priority_then_amount() {
        let exceptions = classify_simple(
            &[
                gl(0, "2025-06-29", dec!(5)),
                gl(1, "2025-06-29", dec!(20000)),
                gl(2, "2025-06-29", dec!(40)),
            ],
            &[],
        );
        assert_eq!(exceptions[0].txn_id, TxnId::new(Source::Gl, 1));
        assert_eq!(exceptions[1].txn_id, TxnId::new(Source::Gl, 2));
        assert_eq!(exceptions[2].txn_id, TxnId::new(Source::Gl, 0));
    }

    #[test]
    fn suggestions_attach_capped_and_sorted() {
        let mut config = RunConfig::default();
        config.exceptions.max_suggestions = 2;
        let evidence = crate::core::model::MatchEvidence {
            amount: 1.0,
            date: 1.0,
            description: 0.5,
            reference: 0.5,
        };
        let make = |bank_row: usize, confidence: f64| MatchSuggestion {
            gl: TxnId::new(Source::Gl, 0),
            bank: TxnId::new(Source::Bank, bank_row),
            confidence,
            evidence,
        };
        let suggestions = vec![make(1, 0.75), make(2, 0.90), make(3, 0.80)];
        let exceptions = classify(
            &[gl(0, "2025-06-01", dec!(10))],
            &[],
            &suggestions,
            &BTreeSet::new(),
            date("2025-06-30"),
            &config,
        );
        let attached = &exceptions[0].suggestions;
        assert_eq!(attached.len(), 2);
        assert_eq!(attached[0].bank, TxnId::new(Source::Bank, 2));
        assert_eq!(attached[1].bank, TxnId::new(Source::Bank, 3));
    }

    #[test]
    fn duplicate_date_slack_extends_clusters() {
        let mut config = RunConfig::default();
        config.exceptions.duplicate_date_epsilon_days = 1;
        let residuals = vec![
            gl(0, "2025-06-01", dec!(10)),
            gl(1, "2025-06-02", dec!(10)),
            gl(2, "2025-06-09", dec!(10)),
        ];
        let clusters = duplicate_clusters(&residuals, &config);
        assert!(clusters.contains_key(&TxnId::new(Source::Gl, 0)));
        assert!(clusters.contains_key(&TxnId::new(Source::Gl, 1)));
        assert!(!clusters.contains_key(&TxnId::new(Source::Gl, 2)));
    }
}
