//! Run configuration: column mappings, tolerances, thresholds.
//!
//! Loaded once from TOML, validated, then passed by shared reference through
//! the pipeline. Every key is optional; defaults reproduce the documented
//! behaviour. Unknown keys are reported as warnings, never fatal.

use crate::core::error::{ConfigError, Warning};
use crate::core::model::{Source, Strategy};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RunConfig {
    pub column_mapping: ColumnMappings,
    pub sign_convention: SignConventions,
    /// Ordered `chrono` format strings tried against date cells.
    pub date_formats: DateFormats,
    pub amount_precision: AmountPrecision,
    /// Token replacements applied to normalised descriptions.
    pub abbreviations: BTreeMap<String, String>,
    /// Noise prefixes stripped from references after uppercasing.
    pub reference_prefixes: ReferencePrefixes,
    pub exact: ExactConfig,
    pub fuzzy: FuzzyConfig,
    pub quality: QualityConfig,
    pub min_quality_for_fuzzy: MinQuality,
    pub exceptions: ExceptionConfig,
}

// Newtype wrappers give scalar keys their documented defaults while keeping
// `#[serde(default)]` on the struct as the single source of optionality.

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DateFormats(pub Vec<String>);

impl Default for DateFormats {
    fn default() -> Self {
        DateFormats(
            [
                "%Y-%m-%d",
                "%m/%d/%Y",
                "%d/%m/%Y",
                "%Y%m%d",
                "%d-%b-%Y",
                "%d-%B-%Y",
                "%d %b %Y",
                "%b %d, %Y",
                "%B %d, %Y",
                "%Y/%m/%d",
                "%d.%m.%Y",
                "%m-%d-%Y",
                "%m/%d/%y",
                "%d/%m/%y",
                "%Y.%m.%d",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AmountPrecision(pub u32);

impl Default for AmountPrecision {
    fn default() -> Self {
        AmountPrecision(2)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ReferencePrefixes(pub Vec<String>);

impl Default for ReferencePrefixes {
    fn default() -> Self {
        ReferencePrefixes(vec!["REF:".into(), "REF#".into()])
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MinQuality(pub f64);

impl Default for MinQuality {
    fn default() -> Self {
        MinQuality(0.5)
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Canonical fields a source column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Date,
    Amount,
    Debit,
    Credit,
    Deposit,
    Withdrawal,
    Description,
    Reference,
}

impl CanonicalField {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::Date => "date",
            CanonicalField::Amount => "amount",
            CanonicalField::Debit => "debit",
            CanonicalField::Credit => "credit",
            CanonicalField::Deposit => "deposit",
            CanonicalField::Withdrawal => "withdrawal",
            CanonicalField::Description => "description",
            CanonicalField::Reference => "reference",
        }
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ColumnMappings {
    pub gl: RoleMapping,
    pub bank: RoleMapping,
}

impl ColumnMappings {
    pub fn for_role(&self, role: Source) -> &RoleMapping {
        match role {
            Source::Gl => &self.gl,
            Source::Bank => &self.bank,
        }
    }
}

/// Per-role column resolution: an explicit source-column → canonical-field
/// map, then ranked synonym fallback.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RoleMapping {
    /// Source column name (as declared in the file) → canonical field.
    pub columns: BTreeMap<String, CanonicalField>,
    /// Canonical field → ranked list of source column names to try when no
    /// explicit mapping matches. Earlier entries win.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for RoleMapping {
    fn default() -> Self {
        RoleMapping {
            columns: BTreeMap::new(),
            synonyms: default_synonyms(),
        }
    }
}

impl RoleMapping {
    pub fn synonyms_for(&self, field: CanonicalField) -> &[String] {
        self.synonyms
            .get(field.name())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

fn default_synonyms() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 8] = [
        (
            "date",
            &["transaction_date", "posting_date", "post_date", "value_date", "date"],
        ),
        ("amount", &["amount", "transaction_amount", "value"]),
        ("debit", &["debit", "debit_amount", "dr"]),
        ("credit", &["credit", "credit_amount", "cr"]),
        ("deposit", &["deposit", "deposits", "paid_in", "money_in"]),
        (
            "withdrawal",
            &["withdrawal", "withdrawals", "paid_out", "money_out"],
        ),
        (
            "description",
            &["description", "memo", "narrative", "details", "transaction_details"],
        ),
        (
            "reference",
            &["reference", "ref", "reference_number", "cheque_number", "check_number"],
        ),
    ];
    entries
        .iter()
        .map(|(field, names)| {
            (
                field.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Sign conventions
// ---------------------------------------------------------------------------

/// How a source encodes the direction of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
pub enum SignConvention {
    /// One signed `amount` column.
    #[serde(rename = "signed-amount")]
    SignedAmount,
    /// `debit − credit`; debits come out positive.
    #[serde(rename = "debit-credit")]
    DebitCredit,
    /// `deposit − withdrawal`; inflows come out positive.
    #[serde(rename = "deposit-withdrawal")]
    DepositWithdrawal,
}

impl SignConvention {
    /// The dual column pair, or `None` for a single signed column.
    pub fn dual_fields(&self) -> Option<(CanonicalField, CanonicalField)> {
        match self {
            SignConvention::SignedAmount => None,
            SignConvention::DebitCredit => Some((CanonicalField::Debit, CanonicalField::Credit)),
            SignConvention::DepositWithdrawal => {
                Some((CanonicalField::Deposit, CanonicalField::Withdrawal))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SignConventions {
    pub gl: SignConvention,
    pub bank: SignConvention,
}

impl Default for SignConventions {
    fn default() -> Self {
        SignConventions {
            gl: SignConvention::DebitCredit,
            bank: SignConvention::DepositWithdrawal,
        }
    }
}

impl SignConventions {
    pub fn for_role(&self, role: Source) -> SignConvention {
        match role {
            Source::Gl => self.gl,
            Source::Bank => self.bank,
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExactConfig {
    /// Strategies applied in order, each over the previous one's residuals.
    pub strategies: Vec<Strategy>,
    #[schemars(with = "f64")]
    pub amount_tolerance: Decimal,
    pub date_tolerance_days: u32,
}

impl Default for ExactConfig {
    fn default() -> Self {
        ExactConfig {
            strategies: vec![
                Strategy::ReferenceExact,
                Strategy::AmountDateExact,
                Strategy::AmountDateDesc,
                Strategy::CompositeKey,
                Strategy::AmountDateWindow,
            ],
            amount_tolerance: Decimal::new(1, 2),
            date_tolerance_days: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FuzzyConfig {
    pub weights: FuzzyWeights,
    pub auto_match_threshold: f64,
    pub review_required_threshold: f64,
    /// Two candidates within this margin count as tied.
    pub confidence_epsilon: f64,
    /// Blocking quantum for amounts.
    #[schemars(with = "f64")]
    pub amount_bucket: Decimal,
    /// Blocking bucket width for dates, in days.
    pub date_window_days: u32,
    /// Amount delta at which `amount_score` reaches zero.
    #[schemars(with = "f64")]
    pub amount_scale: Decimal,
    /// Date delta (days) at which `date_score` reaches zero.
    pub date_scale: f64,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        FuzzyConfig {
            weights: FuzzyWeights::default(),
            auto_match_threshold: 0.95,
            review_required_threshold: 0.70,
            confidence_epsilon: 0.02,
            amount_bucket: Decimal::ONE,
            date_window_days: 3,
            amount_scale: Decimal::ONE,
            date_scale: 14.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FuzzyWeights {
    pub amount: f64,
    pub date: f64,
    pub description: f64,
    pub reference: f64,
}

impl Default for FuzzyWeights {
    fn default() -> Self {
        FuzzyWeights {
            amount: 0.4,
            date: 0.3,
            description: 0.2,
            reference: 0.1,
        }
    }
}

impl FuzzyWeights {
    pub fn sum(&self) -> f64 {
        self.amount + self.date + self.description + self.reference
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QualityWeights {
    pub completeness: f64,
    pub validity: f64,
    pub consistency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        QualityWeights {
            completeness: 0.4,
            validity: 0.3,
            consistency: 0.3,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.completeness + self.validity + self.consistency
    }
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExceptionConfig {
    #[schemars(with = "f64")]
    pub high_amount_threshold: Decimal,
    pub aging_threshold_days: u32,
    /// Upper bound on the date lag still explained as a timing difference.
    pub timing_window_days: u32,
    /// Relative tolerance for calling two amounts "nearly equal".
    #[schemars(with = "f64")]
    pub amount_mismatch_tolerance: Decimal,
    pub max_suggestions: usize,
    /// Date slack when clustering within-source duplicates.
    pub duplicate_date_epsilon_days: u32,
    /// Aging reference date; defaults to the latest transaction date seen in
    /// the run, so results never depend on the wall clock.
    pub reference_date: Option<NaiveDate>,
}

impl Default for ExceptionConfig {
    fn default() -> Self {
        ExceptionConfig {
            high_amount_threshold: Decimal::new(10_000, 0),
            aging_threshold_days: 30,
            timing_window_days: 14,
            amount_mismatch_tolerance: Decimal::new(5, 2),
            max_suggestions: 3,
            duplicate_date_epsilon_days: 0,
            reference_date: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading + validation
// ---------------------------------------------------------------------------

const WEIGHT_TOLERANCE: f64 = 1e-9;

impl RunConfig {
    /// Parse from TOML. Unknown keys become warnings for the audit trail.
    pub fn from_toml(input: &str) -> Result<(RunConfig, Vec<Warning>), ConfigError> {
        let raw: toml::Value = input.parse()?;
        let warnings = unknown_keys(&raw)
            .into_iter()
            .map(Warning::UnknownConfigKey)
            .collect();
        let config: RunConfig = raw.try_into()?;
        config.validate()?;
        Ok((config, warnings))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fuzzy_sum = self.fuzzy.weights.sum();
        if (fuzzy_sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsSum {
                section: "fuzzy",
                sum: fuzzy_sum,
            });
        }
        let quality_sum = self.quality.weights.sum();
        if (quality_sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsSum {
                section: "quality",
                sum: quality_sum,
            });
        }
        if self.fuzzy.review_required_threshold > self.fuzzy.auto_match_threshold {
            return Err(ConfigError::ThresholdInversion {
                review: self.fuzzy.review_required_threshold,
                auto: self.fuzzy.auto_match_threshold,
            });
        }
        for (key, value) in [
            ("fuzzy.auto_match_threshold", self.fuzzy.auto_match_threshold),
            (
                "fuzzy.review_required_threshold",
                self.fuzzy.review_required_threshold,
            ),
            ("min_quality_for_fuzzy", self.min_quality_for_fuzzy.0),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { key, value });
            }
        }
        if self.fuzzy.confidence_epsilon < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "fuzzy.confidence_epsilon",
                value: self.fuzzy.confidence_epsilon,
            });
        }
        if self.fuzzy.amount_bucket <= Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                key: "fuzzy.amount_bucket",
            });
        }
        if self.fuzzy.amount_scale <= Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                key: "fuzzy.amount_scale",
            });
        }
        if self.fuzzy.date_scale <= 0.0 {
            return Err(ConfigError::NotPositive {
                key: "fuzzy.date_scale",
            });
        }
        if self.date_formats.0.is_empty() {
            return Err(ConfigError::NoDateFormats);
        }
        let mut seen = Vec::new();
        for strategy in &self.exact.strategies {
            if *strategy == Strategy::Fuzzy {
                return Err(ConfigError::FuzzyInExactList);
            }
            if seen.contains(strategy) {
                return Err(ConfigError::DuplicateStrategy(*strategy));
            }
            seen.push(*strategy);
        }
        Ok(())
    }
}

/// Dotted paths of keys the parser does not recognise. Free-form tables
/// (column maps, synonyms, abbreviations) are skipped.
fn unknown_keys(raw: &toml::Value) -> Vec<String> {
    const ROOT: &[&str] = &[
        "column_mapping",
        "sign_convention",
        "date_formats",
        "amount_precision",
        "abbreviations",
        "reference_prefixes",
        "exact",
        "fuzzy",
        "quality",
        "min_quality_for_fuzzy",
        "exceptions",
    ];
    const ROLE_MAPPING: &[&str] = &["columns", "synonyms"];
    const SIGN: &[&str] = &["gl", "bank"];
    const EXACT: &[&str] = &["strategies", "amount_tolerance", "date_tolerance_days"];
    const FUZZY: &[&str] = &[
        "weights",
        "auto_match_threshold",
        "review_required_threshold",
        "confidence_epsilon",
        "amount_bucket",
        "date_window_days",
        "amount_scale",
        "date_scale",
    ];
    const FUZZY_WEIGHTS: &[&str] = &["amount", "date", "description", "reference"];
    const QUALITY: &[&str] = &["weights"];
    const QUALITY_WEIGHTS: &[&str] = &["completeness", "validity", "consistency"];
    const EXCEPTIONS: &[&str] = &[
        "high_amount_threshold",
        "aging_threshold_days",
        "timing_window_days",
        "amount_mismatch_tolerance",
        "max_suggestions",
        "duplicate_date_epsilon_days",
        "reference_date",
    ];

    let mut unknown = Vec::new();
    let Some(table) = raw.as_table() else {
        return unknown;
    };

    let mut check = |path: &str, value: Option<&toml::Value>, allowed: &[&str]| {
        let Some(table) = value.and_then(|v| v.as_table()) else {
            return;
        };
        for key in table.keys() {
            if !allowed.contains(&key.as_str()) {
                if path.is_empty() {
                    unknown.push(key.clone());
                } else {
                    unknown.push(format!("{path}.{key}"));
                }
            }
        }
    };

    check("", Some(raw), ROOT);
    check("column_mapping", table.get("column_mapping"), SIGN);
    if let Some(mapping) = table.get("column_mapping").and_then(|v| v.as_table()) {
        for role in SIGN {
            check(
                &format!("column_mapping.{role}"),
                mapping.get(*role),
                ROLE_MAPPING,
            );
        }
    }
    check("sign_convention", table.get("sign_convention"), SIGN);
    check("exact", table.get("exact"), EXACT);
    check("fuzzy", table.get("fuzzy"), FUZZY);
    if let Some(fuzzy) = table.get("fuzzy").and_then(|v| v.as_table()) {
        check("fuzzy.weights", fuzzy.get("weights"), FUZZY_WEIGHTS);
    }
    check("quality", table.get("quality"), QUALITY);
    if let Some(quality) = table.get("quality").and_then(|v| v.as_table()) {
        check("quality.weights", quality.get("weights"), QUALITY_WEIGHTS);
    }
    check("exceptions", table.get("exceptions"), EXCEPTIONS);
    unknown.sort();
    unknown
}
