//! Per-record quality indicators. Scores are computed once, after cleaning,
//! and gate fuzzy matching downstream.

use crate::core::config::RunConfig;
use crate::core::model::{CanonicalTxn, QualityScore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Required canonical fields counted towards completeness. Date and amount
/// are always present after cleaning; description and reference may be empty.
const REQUIRED_FIELDS: f64 = 4.0;

/// Score one source's cleaned transactions, consuming and rebuilding them so
/// the quality of a record never changes after this point.
pub fn score(txns: Vec<CanonicalTxn>, config: &RunConfig) -> Vec<CanonicalTxn> {
    let total = txns.len();
    if total == 0 {
        return txns;
    }

    // Records sharing a (date, amount, reference) key count as collisions.
    let mut key_counts: BTreeMap<(NaiveDate, Decimal, &str), usize> = BTreeMap::new();
    for txn in &txns {
        *key_counts
            .entry((txn.date, txn.amount, txn.reference.as_str()))
            .or_default() += 1;
    }
    let collisions: usize = key_counts.values().filter(|&&n| n >= 2).sum();
    let consistency = 1.0 - collisions as f64 / total as f64;

    let weights = config.quality.weights;
    txns.into_iter()
        .map(|txn| {
            let mut present = 2.0; // date + amount
            if !txn.description.is_empty() {
                present += 1.0;
            }
            if !txn.reference.is_empty() {
                present += 1.0;
            }
            let completeness = present / REQUIRED_FIELDS;
            // Rows with parse failures were ejected before scoring, so
            // survivors are always valid; the component is kept for
            // stricter validators configured upstream.
            let validity = 1.0;
            let overall = weights.completeness * completeness
                + weights.validity * validity
                + weights.consistency * consistency;
            CanonicalTxn {
                quality: QualityScore {
                    completeness,
                    validity,
                    consistency,
                    overall,
                },
                ..txn
            }
        })
        .collect()
}
