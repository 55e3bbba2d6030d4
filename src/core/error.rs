use crate::core::model::{Source, Strategy, TxnId};

/// Fatal errors. Anything recoverable is a [`Warning`] or a per-row
/// [`crate::core::model::ParseError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("{role}: no source column maps to required field '{field}'")]
    MissingField { role: Source, field: &'static str },

    #[error("{role}: both a signed amount column and a {plus}/{minus} pair are mapped; sign convention is ambiguous")]
    AmbiguousSignConvention {
        role: Source,
        plus: &'static str,
        minus: &'static str,
    },

    #[error("{role}: no date format parses at least 80% of the '{column}' column (best: {best_pct}%); check the column mapping")]
    DateColumnUnclassified {
        role: Source,
        column: String,
        best_pct: u8,
    },

    #[error("no rows survived cleaning ({total} in, {ejected} ejected)")]
    ParseExhaustion { total: usize, ejected: usize },

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ReconError {
    /// CLI exit code: 2 for structural input problems, 3 when every row was
    /// ejected, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconError::MissingField { .. }
            | ReconError::AmbiguousSignConvention { .. }
            | ReconError::DateColumnUnclassified { .. } => 2,
            ReconError::ParseExhaustion { .. } => 3,
            ReconError::Config(_) => 1,
        }
    }
}

/// Configuration rejected before any stage runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{section} weights must sum to 1.0 (got {sum})")]
    WeightsSum { section: &'static str, sum: f64 },

    #[error("fuzzy thresholds inverted: review_required_threshold {review} > auto_match_threshold {auto}")]
    ThresholdInversion { review: f64, auto: f64 },

    #[error("{key} must be within [0, 1] (got {value})")]
    OutOfRange { key: &'static str, value: f64 },

    #[error("{key} must be positive")]
    NotPositive { key: &'static str },

    #[error("date_formats must not be empty")]
    NoDateFormats,

    #[error("exact.strategies lists '{0}' more than once")]
    DuplicateStrategy(Strategy),

    #[error("'fuzzy' is not an exact strategy")]
    FuzzyInExactList,

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Recoverable oddities, accumulated into the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A canonical field was resolved through the synonym list rather than
    /// an explicit mapping, or several source columns competed for it.
    Schema {
        role: Source,
        field: &'static str,
        detail: String,
    },
    /// A row was dropped before cleaning.
    Drop {
        role: Source,
        row_index: usize,
        detail: String,
    },
    /// Tied candidates were left unpaired.
    Ambiguity {
        strategy: Strategy,
        records: Vec<TxnId>,
    },
    /// A configuration key was not recognised.
    UnknownConfigKey(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::Schema { role, field, detail } => {
                write!(f, "{role}: field '{field}': {detail}")
            }
            Warning::Drop {
                role,
                row_index,
                detail,
            } => write!(f, "{role}: row {row_index} dropped: {detail}"),
            Warning::Ambiguity { strategy, records } => {
                let ids: Vec<String> = records.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "{strategy}: {} records left unpaired as ambiguous: {}",
                    records.len(),
                    ids.join(", ")
                )
            }
            Warning::UnknownConfigKey(key) => write!(f, "unknown configuration key '{key}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let schema = ReconError::MissingField {
            role: Source::Gl,
            field: "date",
        };
        assert_eq!(schema.exit_code(), 2);
        let exhausted = ReconError::ParseExhaustion {
            total: 4,
            ejected: 4,
        };
        assert_eq!(exhausted.exit_code(), 3);
        let config = ReconError::Config(ConfigError::NoDateFormats);
        assert_eq!(config.exit_code(), 1);
    }

    #[test]
    fn warning_display_is_actionable() {
        let w = Warning::Drop {
            role: Source::Bank,
            row_index: 3,
            detail: "no monetary cell".into(),
        };
        assert_eq!(w.to_string(), "BANK: row 3 dropped: no monetary cell");
    }
}
