//! CSV loader: files in, raw [`SourceRow`]s out. Column names and cell
//! values are preserved verbatim; all interpretation happens in the core.

use crate::core::{Source, SourceRow};
use anyhow::Context;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn load(path: &Path, source: Source) -> anyhow::Result<Vec<SourceRow>> {
    let file =
        File::open(path).with_context(|| format!("opening {} file {}", source, path.display()))?;
    let rows = from_reader(file, source)
        .with_context(|| format!("reading {} file {}", source, path.display()))?;
    log::info!("{source}: loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

pub fn from_reader<R: Read>(reader: R, source: Source) -> anyhow::Result<Vec<SourceRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()
        .context("reading CSV header")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_index, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("reading CSV row {row_index}"))?;
        rows.push(SourceRow {
            source,
            row_index,
            columns: headers
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), record.get(i).unwrap_or("").to_string()))
                .collect(),
        });
    }
    Ok(rows)
}
