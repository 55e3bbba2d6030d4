//! The orchestrator: a straight-line sequence of pure stages over in-memory
//! collections. Either a complete result comes back or a single fatal error;
//! nothing is handed to the report sink on failure.

use crate::core::clean::{self, CleanOutput};
use crate::core::config::RunConfig;
use crate::core::error::{ReconError, Warning};
use crate::core::exact::{self, ExactOutput};
use crate::core::exceptions;
use crate::core::fuzzy::{self, FuzzyOutput};
use crate::core::model::{
    AuditEvent, ParseError, ReconResult, Source, SourceRow, SummaryStats, TxnId,
};
use crate::core::normalise::{self, NormaliseOutput};
use crate::core::quality;
use std::collections::BTreeSet;
use std::time::Instant;

fn audit_event(
    stage: &str,
    input_rows: usize,
    output_rows: usize,
    warnings: &[Warning],
    started: Instant,
) -> AuditEvent {
    AuditEvent {
        stage: stage.to_string(),
        input_rows,
        output_rows,
        elapsed_ms: started.elapsed().as_millis() as u64,
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Run the full pipeline. `config_warnings` carries recoverable findings from
/// configuration loading (unknown keys) into the audit trail.
pub fn reconcile(
    gl_rows: &[SourceRow],
    bank_rows: &[SourceRow],
    config: &RunConfig,
    config_warnings: Vec<Warning>,
) -> Result<ReconResult, ReconError> {
    config.validate()?;
    let mut audit = Vec::new();
    if !config_warnings.is_empty() {
        audit.push(audit_event("configure", 0, 0, &config_warnings, Instant::now()));
    }

    let gl_input = gl_rows.len();
    let bank_input = bank_rows.len();

    // C1: schema normalisation
    let started = Instant::now();
    let NormaliseOutput {
        partials: gl_partials,
        dropped: gl_dropped,
        warnings: gl_warnings,
        resolution: gl_resolution,
    } = normalise::normalise(gl_rows, Source::Gl, config)?;
    let NormaliseOutput {
        partials: bank_partials,
        dropped: bank_dropped,
        warnings: bank_warnings,
        resolution: bank_resolution,
    } = normalise::normalise(bank_rows, Source::Bank, config)?;
    let normalise_warnings: Vec<Warning> =
        gl_warnings.into_iter().chain(bank_warnings).collect();
    let dropped_rows = gl_dropped + bank_dropped;
    audit.push(audit_event(
        "normalise",
        gl_input + bank_input,
        gl_partials.len() + bank_partials.len(),
        &normalise_warnings,
        started,
    ));

    // C2: field cleaning
    let started = Instant::now();
    let partial_count = gl_partials.len() + bank_partials.len();
    let gl_date_column = gl_resolution.map(|r| r.date).unwrap_or_default();
    let bank_date_column = bank_resolution.map(|r| r.date).unwrap_or_default();
    let CleanOutput {
        txns: gl_txns,
        errors: gl_errors,
    } = clean::clean(gl_partials, Source::Gl, &gl_date_column, config)?;
    let CleanOutput {
        txns: bank_txns,
        errors: bank_errors,
    } = clean::clean(bank_partials, Source::Bank, &bank_date_column, config)?;
    let parse_errors: Vec<ParseError> = gl_errors.into_iter().chain(bank_errors).collect();
    let cleaned = gl_txns.len() + bank_txns.len();
    audit.push(audit_event("clean", partial_count, cleaned, &[], started));

    if gl_input + bank_input > 0 && cleaned == 0 {
        return Err(ReconError::ParseExhaustion {
            total: gl_input + bank_input,
            ejected: parse_errors.len(),
        });
    }

    // C3: quality scoring
    let started = Instant::now();
    let gl_txns = quality::score(gl_txns, config);
    let bank_txns = quality::score(bank_txns, config);
    audit.push(audit_event("score", cleaned, cleaned, &[], started));

    // The aging clock for exception priority, fixed before matching so the
    // result never depends on the wall clock.
    let reference_date = config.exceptions.reference_date.unwrap_or_else(|| {
        gl_txns
            .iter()
            .chain(bank_txns.iter())
            .map(|t| t.date)
            .max()
            .unwrap_or_default()
    });

    // C4: exact matching
    let started = Instant::now();
    let ExactOutput {
        matches: exact_matches,
        residuals_gl,
        residuals_bank,
        ambiguous: exact_ambiguous,
        warnings: exact_warnings,
    } = exact::match_exact(gl_txns, bank_txns, config);
    audit.push(audit_event(
        "match_exact",
        cleaned,
        residuals_gl.len() + residuals_bank.len(),
        &exact_warnings,
        started,
    ));

    // C5: fuzzy matching
    let started = Instant::now();
    let residual_count = residuals_gl.len() + residuals_bank.len();
    let FuzzyOutput {
        matches: fuzzy_matches,
        suggestions,
        residuals_gl,
        residuals_bank,
        ambiguous: fuzzy_ambiguous,
        gated: _,
        warnings: fuzzy_warnings,
    } = fuzzy::match_fuzzy(residuals_gl, residuals_bank, config);
    audit.push(audit_event(
        "match_fuzzy",
        residual_count,
        residuals_gl.len() + residuals_bank.len(),
        &fuzzy_warnings,
        started,
    ));

    // Canonical output order regardless of how the input rows were presented.
    let mut residuals_gl = residuals_gl;
    let mut residuals_bank = residuals_bank;
    residuals_gl.sort_by_key(|t| t.txn_id);
    residuals_bank.sort_by_key(|t| t.txn_id);
    let mut parse_errors = parse_errors;
    parse_errors.sort_by_key(|e| (e.source, e.row_index));

    // Hints only matter for records that are still residual.
    let residual_ids: BTreeSet<TxnId> = residuals_gl
        .iter()
        .chain(residuals_bank.iter())
        .map(|t| t.txn_id)
        .collect();
    let ambiguous: BTreeSet<TxnId> = exact_ambiguous
        .into_iter()
        .chain(fuzzy_ambiguous)
        .filter(|id| residual_ids.contains(id))
        .collect();

    // C6: exception classification
    let started = Instant::now();
    let exceptions = exceptions::classify(
        &residuals_gl,
        &residuals_bank,
        &suggestions,
        &ambiguous,
        reference_date,
        config,
    );
    audit.push(audit_event(
        "classify",
        residuals_gl.len() + residuals_bank.len(),
        exceptions.len(),
        &[],
        started,
    ));

    let mut matches = exact_matches;
    let exact_count = matches.len();
    matches.extend(fuzzy_matches);

    let mut exception_counts = std::collections::BTreeMap::new();
    for exception in &exceptions {
        *exception_counts
            .entry(exception.category.to_string())
            .or_insert(0usize) += 1;
    }
    let summary = SummaryStats {
        gl_input,
        bank_input,
        dropped_rows,
        parse_errors: parse_errors.len(),
        exact_matches: exact_count,
        fuzzy_matches: matches.len() - exact_count,
        suggestions: suggestions.len(),
        residuals_gl: residuals_gl.len(),
        residuals_bank: residuals_bank.len(),
        exceptions: exception_counts,
        match_rate: if cleaned == 0 {
            0.0
        } else {
            (matches.len() * 2) as f64 / cleaned as f64
        },
    };
    log::info!(
        "reconciled {} records: {} matches, {} exceptions",
        cleaned,
        matches.len(),
        exceptions.len()
    );

    Ok(ReconResult {
        matches,
        suggestions,
        exceptions,
        residuals_gl,
        residuals_bank,
        parse_errors,
        summary,
        audit,
    })
}
