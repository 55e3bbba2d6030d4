//! Report sink: renders a finished [`ReconResult`] to files. Only invoked
//! after a successful run; the shapes here are a thin, flat projection of
//! the result bundle.

use crate::core::{CanonicalTxn, ReconResult};
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub fn write_reports(result: &ReconResult, out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let json = serde_json::to_string_pretty(result)?;
    fs::write(out_dir.join("result.json"), json).context("writing result.json")?;

    write_csv(
        result.matches.iter().map(|m| MatchRow {
            gl: m.gl.to_string(),
            bank: m.bank.to_string(),
            strategy: m.strategy.to_string(),
            confidence: format!("{:.4}", m.confidence),
            amount_tolerance: format!("{:.2}", m.tolerances_applied.amount_tolerance),
            date_tolerance_days: m.tolerances_applied.date_tolerance_days,
        }),
        &out_dir.join("matches.csv"),
    )?;

    write_csv(
        result.exceptions.iter().map(|e| ExceptionRow {
            txn_id: e.txn_id.to_string(),
            category: e.category.to_string(),
            priority: e.priority.to_string(),
            rationale: e.rationale.clone(),
            suggestions: e
                .suggestions
                .iter()
                .map(|s| format!("{} ({:.2})", s.counterpart(e.txn_id), s.confidence))
                .collect::<Vec<_>>()
                .join("; "),
        }),
        &out_dir.join("exceptions.csv"),
    )?;

    write_csv(
        result.residuals_gl.iter().map(UnmatchedRow::from),
        &out_dir.join("unmatched_gl.csv"),
    )?;
    write_csv(
        result.residuals_bank.iter().map(UnmatchedRow::from),
        &out_dir.join("unmatched_bank.csv"),
    )?;

    write_csv(
        result.parse_errors.iter().map(|e| ParseErrorRow {
            source: e.source.to_string(),
            row_index: e.row_index,
            field: e.field,
            value: e.value.clone(),
            reason: e.reason.clone(),
        }),
        &out_dir.join("parse_errors.csv"),
    )?;

    fs::write(out_dir.join("summary.txt"), summary_text(result)).context("writing summary.txt")?;
    log::info!("reports written to {}", out_dir.display());
    Ok(())
}

pub fn summary_text(result: &ReconResult) -> String {
    let s = &result.summary;
    let mut lines = vec![
        "RECONCILIATION SUMMARY".to_string(),
        String::new(),
        format!("  Input: {} GL rows, {} bank rows", s.gl_input, s.bank_input),
        format!(
            "  Dropped: {} | Parse failures: {}",
            s.dropped_rows, s.parse_errors
        ),
        format!(
            "  Matches: {} exact, {} fuzzy ({:.1}% of records)",
            s.exact_matches,
            s.fuzzy_matches,
            s.match_rate * 100.0
        ),
        format!("  Suggestions for review: {}", s.suggestions),
        format!(
            "  Unmatched: {} GL, {} bank",
            s.residuals_gl, s.residuals_bank
        ),
    ];
    if !s.exceptions.is_empty() {
        lines.push(String::new());
        lines.push("  Exceptions:".to_string());
        for (category, count) in &s.exceptions {
            lines.push(format!("    {category}: {count}"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn write_csv<I, R>(records: I, path: &Path) -> anyhow::Result<()>
where
    I: IntoIterator<Item = R>,
    R: Serialize,
{
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct MatchRow {
    gl: String,
    bank: String,
    strategy: String,
    confidence: String,
    amount_tolerance: String,
    date_tolerance_days: u32,
}

#[derive(Serialize)]
struct ExceptionRow {
    txn_id: String,
    category: String,
    priority: String,
    rationale: String,
    suggestions: String,
}

#[derive(Serialize)]
struct UnmatchedRow {
    txn_id: String,
    date: String,
    amount: String,
    description: String,
    reference: String,
    quality: String,
}

impl From<&CanonicalTxn> for UnmatchedRow {
    fn from(txn: &CanonicalTxn) -> Self {
        UnmatchedRow {
            txn_id: txn.txn_id.to_string(),
            date: txn.date.format("%Y-%m-%d").to_string(),
            amount: format!("{:.2}", txn.amount),
            description: txn.description.clone(),
            reference: txn.reference.clone(),
            quality: format!("{:.2}", txn.quality.overall),
        }
    }
}

#[derive(Serialize)]
struct ParseErrorRow {
    source: String,
    row_index: usize,
    field: &'static str,
    value: String,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{reconcile, RunConfig, Source, SourceRow};

    fn sample_result() -> ReconResult {
        let gl = vec![SourceRow {
            source: Source::Gl,
            row_index: 0,
            columns: vec![
                ("date".into(), "2025-01-15".into()),
                ("debit".into(), "100.00".into()),
                ("credit".into(), "".into()),
                ("description".into(), "payment to acme".into()),
                ("reference".into(), "INV001".into()),
            ],
        }];
        let bank = vec![SourceRow {
            source: Source::Bank,
            row_index: 0,
            columns: vec![
                ("date".into(), "2025-01-15".into()),
                ("withdrawal".into(), "100.00".into()),
                ("deposit".into(), "".into()),
                ("description".into(), "acme pmt".into()),
                ("reference".into(), "INV001".into()),
            ],
        }];
        reconcile(&gl, &bank, &RunConfig::default(), Vec::new()).unwrap()
    }

    #[test]
    fn writes_all_report_files() {
        let result = sample_result();
        let dir = tempfile::tempdir().unwrap();
        write_reports(&result, dir.path()).unwrap();
        for name in [
            "result.json",
            "matches.csv",
            "exceptions.csv",
            "unmatched_gl.csv",
            "unmatched_bank.csv",
            "parse_errors.csv",
            "summary.txt",
        ] {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }
        let matches = fs::read_to_string(dir.path().join("matches.csv")).unwrap();
        assert!(matches.contains("reference_exact"));
        assert!(matches.contains("GL:0"));
        let json = fs::read_to_string(dir.path().join("result.json")).unwrap();
        assert!(json.contains("\"matches\""));
    }

    #[test]
    fn summary_text_mentions_the_headline_numbers() {
        let result = sample_result();
        let text = summary_text(&result);
        assert!(text.contains("1 GL rows, 1 bank rows"));
        assert!(text.contains("1 exact, 0 fuzzy"));
    }
}
