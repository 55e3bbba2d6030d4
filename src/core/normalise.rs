//! Schema normalisation: map source-declared columns onto the canonical
//! field set and resolve the sign convention, leaving cell values unparsed.

use crate::core::config::{CanonicalField, RunConfig};
use crate::core::error::{ReconError, Warning};
use crate::core::model::{PartialTxn, RawAmount, Source, SourceRow};

/// Where each canonical field lives in a particular file.
#[derive(Debug, Clone)]
pub struct ColumnResolution {
    pub date: String,
    pub money: MoneyColumns,
    pub description: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyColumns {
    Single(String),
    Dual { plus: String, minus: String },
}

#[derive(Debug)]
pub struct NormaliseOutput {
    pub partials: Vec<PartialTxn>,
    pub dropped: usize,
    pub warnings: Vec<Warning>,
    /// Resolved column locations; `None` when the input had no rows.
    pub resolution: Option<ColumnResolution>,
}

/// Header comparison key: case, surrounding space, and space-vs-underscore
/// differences never matter.
fn header_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Resolve every canonical field against the declared headers.
///
/// Explicit mappings win; otherwise the ranked synonym list is consulted and
/// the highest-ranked hit is taken, with a warning when more than one header
/// competed for the field.
pub fn resolve_columns(
    headers: &[String],
    role: Source,
    config: &RunConfig,
) -> Result<(ColumnResolution, Vec<Warning>), ReconError> {
    let mapping = config.column_mapping.for_role(role);
    let mut warnings = Vec::new();

    let find_header = |wanted: &str| -> Option<&String> {
        let key = header_key(wanted);
        headers.iter().find(|h| header_key(h) == key)
    };

    let mut resolve = |field: CanonicalField| -> Option<String> {
        // Explicit map first.
        let explicit: Vec<&String> = mapping
            .columns
            .iter()
            .filter(|(_, target)| **target == field)
            .filter_map(|(name, _)| find_header(name))
            .collect();
        if let Some(first) = explicit.first() {
            if explicit.len() > 1 {
                warnings.push(Warning::Schema {
                    role,
                    field: field.name(),
                    detail: format!(
                        "{} mapped columns present; using '{first}'",
                        explicit.len()
                    ),
                });
            }
            return Some((*first).clone());
        }

        // Ranked synonym fallback.
        let hits: Vec<(usize, &String)> = mapping
            .synonyms_for(field)
            .iter()
            .enumerate()
            .filter_map(|(rank, syn)| find_header(syn).map(|h| (rank, h)))
            .collect();
        match hits.as_slice() {
            [] => None,
            [(_, only)] => Some((*only).clone()),
            [(_, best), ..] => {
                warnings.push(Warning::Schema {
                    role,
                    field: field.name(),
                    detail: format!(
                        "{} synonym columns present; highest-ranked '{best}' wins",
                        hits.len()
                    ),
                });
                Some((*best).clone())
            }
        }
    };

    let date = resolve(CanonicalField::Date).ok_or(ReconError::MissingField {
        role,
        field: CanonicalField::Date.name(),
    })?;
    let description = resolve(CanonicalField::Description);
    let reference = resolve(CanonicalField::Reference);

    let convention = config.sign_convention.for_role(role);
    let single = resolve(CanonicalField::Amount);
    let money = match convention.dual_fields() {
        None => MoneyColumns::Single(single.ok_or(ReconError::MissingField {
            role,
            field: CanonicalField::Amount.name(),
        })?),
        Some((plus_field, minus_field)) => {
            let plus = resolve(plus_field);
            let minus = resolve(minus_field);
            match (plus, minus, single) {
                (Some(_), Some(_), Some(_)) => {
                    return Err(ReconError::AmbiguousSignConvention {
                        role,
                        plus: plus_field.name(),
                        minus: minus_field.name(),
                    });
                }
                (Some(plus), Some(minus), None) => MoneyColumns::Dual { plus, minus },
                (_, _, Some(amount)) => {
                    warnings.push(Warning::Schema {
                        role,
                        field: CanonicalField::Amount.name(),
                        detail: format!(
                            "no {}/{} pair; falling back to signed column '{amount}'",
                            plus_field.name(),
                            minus_field.name()
                        ),
                    });
                    MoneyColumns::Single(amount)
                }
                (plus, _, None) => {
                    let missing = if plus.is_none() {
                        plus_field.name()
                    } else {
                        minus_field.name()
                    };
                    return Err(ReconError::MissingField {
                        role,
                        field: missing,
                    });
                }
            }
        }
    };

    Ok((
        ColumnResolution {
            date,
            money,
            description,
            reference,
        },
        warnings,
    ))
}

/// Map raw rows onto partially normalised transactions. Rows with no
/// monetary cell at all are dropped with a warning.
pub fn normalise(
    rows: &[SourceRow],
    role: Source,
    config: &RunConfig,
) -> Result<NormaliseOutput, ReconError> {
    if rows.is_empty() {
        return Ok(NormaliseOutput {
            partials: Vec::new(),
            dropped: 0,
            warnings: Vec::new(),
            resolution: None,
        });
    }

    let headers: Vec<String> = rows[0]
        .columns
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    let (resolution, mut warnings) = resolve_columns(&headers, role, config)?;

    let mut partials = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let cell = |column: &Option<String>| -> String {
            column
                .as_deref()
                .and_then(|c| row.cell(c))
                .unwrap_or("")
                .to_string()
        };

        let amount_raw = match &resolution.money {
            MoneyColumns::Single(column) => {
                let value = row.cell(column).unwrap_or("").trim().to_string();
                if value.is_empty() {
                    dropped += 1;
                    warnings.push(Warning::Drop {
                        role,
                        row_index: row.row_index,
                        detail: format!("no value in monetary column '{column}'"),
                    });
                    continue;
                }
                RawAmount::Single(value)
            }
            MoneyColumns::Dual { plus, minus } => {
                let plus_value = row.cell(plus).unwrap_or("").trim().to_string();
                let minus_value = row.cell(minus).unwrap_or("").trim().to_string();
                if plus_value.is_empty() && minus_value.is_empty() {
                    dropped += 1;
                    warnings.push(Warning::Drop {
                        role,
                        row_index: row.row_index,
                        detail: format!("no value in monetary columns '{plus}'/'{minus}'"),
                    });
                    continue;
                }
                RawAmount::Dual {
                    plus: plus_value,
                    minus: minus_value,
                }
            }
        };

        partials.push(PartialTxn {
            source: role,
            row_index: row.row_index,
            date_raw: row.cell(&resolution.date).unwrap_or("").to_string(),
            amount_raw,
            description_raw: cell(&resolution.description),
            reference_raw: cell(&resolution.reference),
        });
    }

    log::debug!(
        "{role}: normalised {} rows, dropped {dropped}",
        partials.len()
    );

    Ok(NormaliseOutput {
        partials,
        dropped,
        warnings,
        resolution: Some(resolution),
    })
}
