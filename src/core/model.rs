use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub fn serialize_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
}

pub fn serialize_amount<S: Serializer>(d: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.2}", d))
}

/// Which ledger a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Gl,
    Bank,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::Gl => "GL",
            Source::Bank => "BANK",
        }
    }

    pub fn other(&self) -> Source {
        match self {
            Source::Gl => Source::Bank,
            Source::Bank => Source::Gl,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Stable identifier for a transaction within a run.
///
/// Rendered as `"GL:3"` / `"BANK:17"`. Ordering is `(source, row_index)`,
/// which keeps tie-breaks independent of the presentation order of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId {
    pub source: Source,
    pub row_index: usize,
}

impl TxnId {
    pub fn new(source: Source, row_index: usize) -> Self {
        TxnId { source, row_index }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.row_index)
    }
}

impl Serialize for TxnId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A raw record as delivered by the loader. Column names and cell values are
/// kept verbatim, in file order, for audit.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub source: Source,
    pub row_index: usize,
    pub columns: Vec<(String, String)>,
}

impl SourceRow {
    /// Cell value for a source column, matched case-insensitively and trimmed.
    pub fn cell(&self, column: &str) -> Option<&str> {
        let wanted = column.trim();
        self.columns
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    }
}

/// The monetary cell(s) of a partially normalised row. Dual-column
/// conventions stay split until coercion so a parse failure can point at the
/// offending cell.
#[derive(Debug, Clone)]
pub enum RawAmount {
    Single(String),
    /// `plus − minus`: debit − credit for GL, deposit − withdrawal for bank.
    Dual { plus: String, minus: String },
}

/// Output of the schema normaliser: mapped but not yet parsed.
#[derive(Debug, Clone)]
pub struct PartialTxn {
    pub source: Source,
    pub row_index: usize,
    pub date_raw: String,
    pub amount_raw: RawAmount,
    pub description_raw: String,
    pub reference_raw: String,
}

/// Per-record data quality indicators, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub completeness: f64,
    pub validity: f64,
    pub consistency: f64,
    pub overall: f64,
}

impl Default for QualityScore {
    fn default() -> Self {
        QualityScore {
            completeness: 1.0,
            validity: 1.0,
            consistency: 1.0,
            overall: 1.0,
        }
    }
}

/// A fully normalised transaction ready for matching.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalTxn {
    pub txn_id: TxnId,
    pub source: Source,
    /// Audit link back to the originating raw row.
    pub row_index: usize,
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Decimal,
    pub description: String,
    pub reference: String,
    pub quality: QualityScore,
}

/// Matching rule that produced a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ReferenceExact,
    AmountDateExact,
    AmountDateDesc,
    CompositeKey,
    AmountDateWindow,
    Fuzzy,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ReferenceExact => "reference_exact",
            Strategy::AmountDateExact => "amount_date_exact",
            Strategy::AmountDateDesc => "amount_date_desc",
            Strategy::CompositeKey => "composite_key",
            Strategy::AmountDateWindow => "amount_date_window",
            Strategy::Fuzzy => "fuzzy",
        }
    }

    pub fn is_exact(&self) -> bool {
        !matches!(self, Strategy::Fuzzy)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Numeric tolerances in force when a pairing was made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppliedTolerances {
    #[serde(serialize_with = "serialize_amount")]
    pub amount_tolerance: Decimal,
    pub date_tolerance_days: u32,
}

/// An accepted pairing between one GL and one bank transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub gl: TxnId,
    pub bank: TxnId,
    pub strategy: Strategy,
    pub confidence: f64,
    pub tolerances_applied: AppliedTolerances,
}

/// Per-field similarity contributions behind a fuzzy score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchEvidence {
    pub amount: f64,
    pub date: f64,
    pub description: f64,
    pub reference: f64,
}

/// A pairing good enough to show a reviewer but not good enough to accept.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSuggestion {
    pub gl: TxnId,
    pub bank: TxnId,
    pub confidence: f64,
    pub evidence: MatchEvidence,
}

impl MatchSuggestion {
    /// The other end of the suggestion, seen from `id`.
    pub fn counterpart(&self, id: TxnId) -> TxnId {
        if self.gl == id {
            self.bank
        } else {
            self.gl
        }
    }
}

/// Why a residual transaction is unreconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionCategory {
    TimingDifference,
    AmountMismatch,
    MissingCounterpart,
    DuplicateSuspected,
    AmbiguousMatch,
    DataQuality,
    Unclassified,
}

impl ExceptionCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCategory::TimingDifference => "TIMING_DIFFERENCE",
            ExceptionCategory::AmountMismatch => "AMOUNT_MISMATCH",
            ExceptionCategory::MissingCounterpart => "MISSING_COUNTERPART",
            ExceptionCategory::DuplicateSuspected => "DUPLICATE_SUSPECTED",
            ExceptionCategory::AmbiguousMatch => "AMBIGUOUS_MATCH",
            ExceptionCategory::DataQuality => "DATA_QUALITY",
            ExceptionCategory::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl fmt::Display for ExceptionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Review urgency. Ordered so that `High > Med > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Med,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "LOW"),
            Priority::Med => write!(f, "MED"),
            Priority::High => write!(f, "HIGH"),
        }
    }
}

/// A classified residual transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Exception {
    pub txn_id: TxnId,
    pub category: ExceptionCategory,
    pub priority: Priority,
    pub suggestions: Vec<MatchSuggestion>,
    pub rationale: String,
}

/// A row ejected during cleaning, with the offending cell preserved.
#[derive(Debug, Clone, Serialize)]
pub struct ParseError {
    pub source: Source,
    pub row_index: usize,
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

/// One entry per pipeline stage. `timestamp` and `elapsed_ms` are the only
/// wall-clock data in a result and are excluded from the idempotence
/// contract.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub stage: String,
    pub input_rows: usize,
    pub output_rows: usize,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
    pub timestamp: String,
}

/// Run-level counts for the summary report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryStats {
    pub gl_input: usize,
    pub bank_input: usize,
    pub dropped_rows: usize,
    pub parse_errors: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub suggestions: usize,
    pub residuals_gl: usize,
    pub residuals_bank: usize,
    pub exceptions: BTreeMap<String, usize>,
    /// Matched records over cleanly parsed records, in [0, 1].
    pub match_rate: f64,
}

/// The complete, immutable output of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub matches: Vec<Match>,
    pub suggestions: Vec<MatchSuggestion>,
    pub exceptions: Vec<Exception>,
    pub residuals_gl: Vec<CanonicalTxn>,
    pub residuals_bank: Vec<CanonicalTxn>,
    pub parse_errors: Vec<ParseError>,
    pub summary: SummaryStats,
    pub audit: Vec<AuditEvent>,
}

impl ReconResult {
    /// All transactions a given id could refer to, for audit lookups.
    pub fn residual(&self, id: TxnId) -> Option<&CanonicalTxn> {
        let pool = match id.source {
            Source::Gl => &self.residuals_gl,
            Source::Bank => &self.residuals_bank,
        };
        pool.iter().find(|t| t.txn_id == id)
    }
}
