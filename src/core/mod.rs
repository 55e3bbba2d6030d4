pub mod clean;
pub mod config;
pub mod error;
pub mod exact;
pub mod exceptions;
pub mod fuzzy;
pub mod model;
pub mod normalise;
pub mod pipeline;
pub mod quality;

// Flat public surface for domain types and functions.
pub use config::{RunConfig, SignConvention};
pub use error::{ConfigError, ReconError, Warning};
pub use model::{
    AuditEvent, CanonicalTxn, Exception, ExceptionCategory, Match, MatchSuggestion, ParseError,
    Priority, QualityScore, ReconResult, Source, SourceRow, Strategy, SummaryStats, TxnId,
};
pub use normalise::resolve_columns;
pub use pipeline::reconcile;
