//! Check command - validate configuration and column mappings without
//! running the matching stages

use crate::core::{resolve_columns, Source};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Configuration file (TOML) to validate
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Optionally check that this GL export's headers map cleanly
    #[arg(long)]
    gl: Option<PathBuf>,

    /// Optionally check that this bank export's headers map cleanly
    #[arg(long)]
    bank: Option<PathBuf>,

    /// Output as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Finding {
    severity: &'static str,
    subject: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    error_count: usize,
    findings: Vec<Finding>,
}

impl CheckCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let mut findings = Vec::new();

        // A config that fails to parse or validate is a hard error.
        let (config, config_warnings) = super::load_config(self.config.as_deref())?;
        for warning in &config_warnings {
            findings.push(Finding {
                severity: "warning",
                subject: "config".into(),
                message: warning.to_string(),
            });
        }

        for (path, role) in [(&self.gl, Source::Gl), (&self.bank, Source::Bank)] {
            let Some(path) = path else { continue };
            match read_headers(path)? {
                None => findings.push(Finding {
                    severity: "error",
                    subject: role.to_string(),
                    message: format!("{}: no header row", path.display()),
                }),
                Some(headers) => match resolve_columns(&headers, role, &config) {
                    Ok((_, warnings)) => {
                        for warning in warnings {
                            findings.push(Finding {
                                severity: "warning",
                                subject: role.to_string(),
                                message: warning.to_string(),
                            });
                        }
                    }
                    Err(err) => findings.push(Finding {
                        severity: "error",
                        subject: role.to_string(),
                        message: err.to_string(),
                    }),
                },
            }
        }

        let error_count = findings.iter().filter(|f| f.severity == "error").count();
        if self.json {
            let output = CheckOutput {
                error_count,
                findings: findings.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            self.print_text(&findings, error_count);
        }

        if error_count > 0 {
            std::process::exit(1);
        }
        Ok(())
    }

    fn print_text(&self, findings: &[Finding], error_count: usize) {
        println!();
        if findings.is_empty() {
            println!("\u{2713} Configuration and mappings look good.");
            return;
        }
        for (i, finding) in findings.iter().enumerate() {
            println!(
                "  {}. [{}] {}: {}",
                i + 1,
                finding.severity,
                finding.subject,
                finding.message
            );
        }
        println!();
        if error_count > 0 {
            println!("\u{26A0} {error_count} error(s) found.");
        } else {
            println!("\u{2713} No errors, {} warning(s).", findings.len());
        }
    }
}

fn read_headers(path: &Path) -> anyhow::Result<Option<Vec<String>>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?;
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(headers.iter().map(|h| h.to_string()).collect()))
}
