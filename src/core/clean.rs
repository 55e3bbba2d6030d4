//! Field cleaning: coerce dates and amounts, normalise free text.
//!
//! Per-row failures are collected as [`ParseError`] values and never unwind
//! through the pipeline; a row either becomes a [`CanonicalTxn`] or exactly
//! one parse error.

use crate::core::config::RunConfig;
use crate::core::error::ReconError;
use crate::core::model::{CanonicalTxn, ParseError, PartialTxn, QualityScore, RawAmount, Source, TxnId};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Fraction of non-empty values a single format must parse for a column to
/// qualify as a date column. Guards against a numeric column mis-mapped as
/// the date.
const DATE_GATE: f64 = 0.8;

#[derive(Debug)]
pub struct CleanOutput {
    pub txns: Vec<CanonicalTxn>,
    pub errors: Vec<ParseError>,
}

/// Try the configured formats in order; first success wins.
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    formats
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
}

/// Coerce one monetary cell: currency symbols, thousands separators and
/// whitespace are stripped, parentheses negate.
pub fn parse_amount(value: &str) -> Option<Decimal> {
    let mut text = value.trim();
    let mut negate = false;
    if text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        negate = true;
        text = &text[1..text.len() - 1];
    }
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | '£' | '€' | '¥' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let parsed = Decimal::from_str(&cleaned).ok()?;
    Some(if negate { -parsed } else { parsed })
}

fn round_amount(amount: Decimal, precision: u32) -> Decimal {
    amount.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

/// Lowercase, collapse whitespace, strip edge punctuation, then expand
/// configured abbreviations token by token. The order is fixed; the whole
/// transform is idempotent.
pub fn normalize_description(input: &str, abbreviations: &BTreeMap<String, String>) -> String {
    let lowered = input.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = collapsed.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    stripped
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(|token| {
            abbreviations
                .get(token)
                .map(String::as_str)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercase, drop whitespace, then peel configured noise prefixes until
/// none match.
pub fn normalize_reference(input: &str, prefixes: &[String]) -> String {
    let mut reference: String = input
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let prefixes: Vec<String> = prefixes
        .iter()
        .map(|p| {
            p.to_uppercase()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect()
        })
        .filter(|p: &String| !p.is_empty())
        .collect();
    loop {
        let before = reference.len();
        for prefix in &prefixes {
            if let Some(rest) = reference.strip_prefix(prefix.as_str()) {
                reference = rest.to_string();
            }
        }
        if reference.len() == before {
            break;
        }
    }
    reference
}

/// The date-column gate: some single format must parse at least
/// [`DATE_GATE`] of the non-empty values. An empty column passes vacuously.
fn check_date_column(
    partials: &[PartialTxn],
    role: Source,
    date_column: &str,
    formats: &[String],
) -> Result<(), ReconError> {
    let values: Vec<&str> = partials
        .iter()
        .map(|p| p.date_raw.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Ok(());
    }
    let mut best = 0usize;
    for format in formats {
        let hits = values
            .iter()
            .filter(|v| NaiveDate::parse_from_str(v, format).is_ok())
            .count();
        best = best.max(hits);
        if hits as f64 / values.len() as f64 >= DATE_GATE {
            return Ok(());
        }
    }
    Err(ReconError::DateColumnUnclassified {
        role,
        column: date_column.to_string(),
        best_pct: ((best * 100) / values.len()) as u8,
    })
}

/// Clean one source's partial transactions. Input order is preserved.
pub fn clean(
    partials: Vec<PartialTxn>,
    role: Source,
    date_column: &str,
    config: &RunConfig,
) -> Result<CleanOutput, ReconError> {
    check_date_column(&partials, role, date_column, &config.date_formats.0)?;

    let precision = config.amount_precision.0;
    let mut txns = Vec::with_capacity(partials.len());
    let mut errors = Vec::new();

    for partial in partials {
        let PartialTxn {
            source,
            row_index,
            date_raw,
            amount_raw,
            description_raw,
            reference_raw,
        } = partial;

        let date = match parse_date(&date_raw, &config.date_formats.0) {
            Some(date) => date,
            None => {
                errors.push(ParseError {
                    source,
                    row_index,
                    field: "date",
                    value: date_raw,
                    reason: "no configured date format matches".into(),
                });
                continue;
            }
        };

        let amount = match &amount_raw {
            RawAmount::Single(cell) => parse_amount(cell),
            RawAmount::Dual { plus, minus } => {
                let plus_value = if plus.trim().is_empty() {
                    Some(Decimal::ZERO)
                } else {
                    parse_amount(plus)
                };
                let minus_value = if minus.trim().is_empty() {
                    Some(Decimal::ZERO)
                } else {
                    parse_amount(minus)
                };
                match (plus_value, minus_value) {
                    (Some(p), Some(m)) => Some(p - m),
                    _ => None,
                }
            }
        };
        let amount = match amount {
            Some(amount) => round_amount(amount, precision),
            None => {
                let value = match amount_raw {
                    RawAmount::Single(cell) => cell,
                    RawAmount::Dual { plus, minus } => format!("{plus}/{minus}"),
                };
                errors.push(ParseError {
                    source,
                    row_index,
                    field: "amount",
                    value,
                    reason: "not a decimal amount".into(),
                });
                continue;
            }
        };

        txns.push(CanonicalTxn {
            txn_id: TxnId::new(source, row_index),
            source,
            row_index,
            date,
            amount,
            description: normalize_description(&description_raw, &config.abbreviations),
            reference: normalize_reference(&reference_raw, &config.reference_prefixes.0),
            quality: QualityScore::default(),
        });
    }

    if !errors.is_empty() {
        log::warn!("{role}: {} rows ejected during cleaning", errors.len());
    }

    Ok(CleanOutput { txns, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn formats() -> Vec<String> {
        RunConfig::default().date_formats.0
    }

    fn partial(row_index: usize, date: &str, amount: RawAmount) -> PartialTxn {
        PartialTxn {
            source: Source::Gl,
            row_index,
            date_raw: date.into(),
            amount_raw: amount,
            description_raw: String::new(),
            reference_raw: String::new(),
        }
    }

    #[test]
    fn parses_common_date_formats() {
        let formats = formats();
        let expected = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        for value in [
            "2025-01-15",
            "01/15/2025",
            "20250115",
            "15-Jan-2025",
            "15 Jan 2025",
            "Jan 15, 2025",
            "2025/01/15",
            "15.01.2025",
        ] {
            assert_eq!(parse_date(value, &formats), Some(expected), "{value}");
        }
    }

    #[test]
    fn first_format_wins_for_ambiguous_days() {
        // 01/02 is ambiguous; the default list tries month-first first.
        let parsed = parse_date("01/02/2025", &formats()).unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    }

    #[test]
    fn amount_scrubbing() {
        assert_eq!(parse_amount("1,234.50"), Some(dec!(1234.50)));
        assert_eq!(parse_amount("$ 99.95"), Some(dec!(99.95)));
        assert_eq!(parse_amount("£1,000"), Some(dec!(1000)));
        assert_eq!(parse_amount("(123.45)"), Some(dec!(-123.45)));
        assert_eq!(parse_amount("-42"), Some(dec!(-42)));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_amount(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round_amount(dec!(-2.345), 2), dec!(-2.35));
        assert_eq!(round_amount(dec!(2.344), 2), dec!(2.34));
    }

    #[test]
    fn description_normalisation_order() {
        let mut abbreviations = BTreeMap::new();
        abbreviations.insert("pmt".to_string(), "payment".to_string());
        assert_eq!(
            normalize_description("  *ACME   PMT*  ", &abbreviations),
            "acme payment"
        );
        // idempotent
        let once = normalize_description("ACME PMT", &abbreviations);
        assert_eq!(normalize_description(&once, &abbreviations), once);
    }

    #[test]
    fn reference_normalisation() {
        let prefixes = vec!["REF:".to_string()];
        assert_eq!(normalize_reference(" ref: inv 001 ", &prefixes), "INV001");
        assert_eq!(normalize_reference("REF:REF:77", &prefixes), "77");
        assert_eq!(normalize_reference("  ", &prefixes), "");
        // idempotent
        let once = normalize_reference("ref:abc", &prefixes);
        assert_eq!(normalize_reference(&once, &prefixes), once);
    }

    #[test]
    fn dual_columns_combine_signed() {
        let config = RunConfig::default();
        let partials = vec![
            partial(
                0,
                "2025-01-15",
                RawAmount::Dual {
                    plus: "100.00".into(),
                    minus: "".into(),
                },
            ),
            partial(
                1,
                "2025-01-16",
                RawAmount::Dual {
                    plus: "".into(),
                    minus: "30.00".into(),
                },
            ),
        ];
        let out = clean(partials, Source::Gl, "date", &config).unwrap();
        assert_eq!(out.errors.len(), 0);
        assert_eq!(out.txns[0].amount, dec!(100.00));
        assert_eq!(out.txns[1].amount, dec!(-30.00));
    }

    #[test]
    fn bad_rows_become_parse_errors_not_panics() {
        let config = RunConfig::default();
        let partials = vec![
            partial(0, "2025-01-15", RawAmount::Single("10.00".into())),
            partial(1, "2025-01-16", RawAmount::Single("N/A".into())),
            partial(2, "not a date", RawAmount::Single("5.00".into())),
        ];
        let out = clean(partials, Source::Gl, "date", &config).unwrap();
        assert_eq!(out.txns.len(), 1);
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.errors[0].field, "amount");
        assert_eq!(out.errors[0].value, "N/A");
        assert_eq!(out.errors[1].field, "date");
        assert_eq!(out.errors[1].row_index, 2);
    }

    #[test]
    fn date_gate_rejects_numeric_column() {
        let config = RunConfig::default();
        let partials = vec![
            partial(0, "100.00", RawAmount::Single("1".into())),
            partial(1, "200.00", RawAmount::Single("2".into())),
            partial(2, "300.00", RawAmount::Single("3".into())),
        ];
        let err = clean(partials, Source::Gl, "amount", &config).unwrap_err();
        assert!(matches!(
            err,
            ReconError::DateColumnUnclassified { role: Source::Gl, .. }
        ));
    }

    #[test]
    fn date_gate_tolerates_minority_of_bad_values() {
        let config = RunConfig::default();
        let mut partials: Vec<PartialTxn> = (0..4)
            .map(|i| partial(i, "2025-01-15", RawAmount::Single("1".into())))
            .collect();
        partials.push(partial(4, "garbage", RawAmount::Single("1".into())));
        // 4 of 5 parse with %Y-%m-%d: the gate passes, the bad row ejects.
        let out = clean(partials, Source::Gl, "date", &config).unwrap();
        assert_eq!(out.txns.len(), 4);
        assert_eq!(out.errors.len(), 1);
    }

    #[test]
    fn date_gate_passes_vacuously_on_empty_input() {
        let config = RunConfig::default();
        let out = clean(Vec::new(), Source::Gl, "date", &config).unwrap();
        assert!(out.txns.is_empty());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn cleaning_is_idempotent_on_text_fields() {
        let config = RunConfig::default();
        let partials = vec![PartialTxn {
            source: Source::Gl,
            row_index: 0,
            date_raw: "2025-01-15".into(),
            amount_raw: RawAmount::Single("10.00".into()),
            description_raw: "  Payment   TO Acme Ltd. ".into(),
            reference_raw: "ref: inv 9".into(),
        }];
        let out = clean(partials, Source::Gl, "date", &config).unwrap();
        let txn = &out.txns[0];
        assert_eq!(
            normalize_description(&txn.description, &config.abbreviations),
            txn.description
        );
        assert_eq!(
            normalize_reference(&txn.reference, &config.reference_prefixes.0),
            txn.reference
        );
    }
}
