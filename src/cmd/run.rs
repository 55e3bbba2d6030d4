//! Run command - reconcile a GL export against a bank export

use crate::core::{reconcile, ReconResult, Source};
use crate::{loader, report};
use clap::Args;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct RunCommand {
    /// General-ledger export (CSV)
    #[arg(long)]
    gl: PathBuf,

    /// Bank-statement export (CSV)
    #[arg(long)]
    bank: PathBuf,

    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the report files are written to
    #[arg(short, long)]
    out: PathBuf,

    /// Print the summary as JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

#[derive(Tabled)]
struct ExceptionLine {
    #[tabled(rename = "Txn")]
    txn: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Detail")]
    rationale: String,
}

impl RunCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let (config, config_warnings) = super::load_config(self.config.as_deref())?;
        let gl_rows = loader::load(&self.gl, Source::Gl)?;
        let bank_rows = loader::load(&self.bank, Source::Bank)?;

        let result = reconcile(&gl_rows, &bank_rows, &config, config_warnings)?;
        report::write_reports(&result, &self.out)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result.summary)?);
        } else {
            self.print_summary(&result);
        }
        Ok(())
    }

    fn print_summary(&self, result: &ReconResult) {
        println!();
        print!("{}", report::summary_text(result));

        if !result.exceptions.is_empty() {
            let lines: Vec<ExceptionLine> = result
                .exceptions
                .iter()
                .map(|e| ExceptionLine {
                    txn: e.txn_id.to_string(),
                    category: e.category.to_string(),
                    priority: e.priority.to_string(),
                    amount: result
                        .residual(e.txn_id)
                        .map(|t| format!("{:.2}", t.amount))
                        .unwrap_or_default(),
                    rationale: e.rationale.clone(),
                })
                .collect();
            let table = Table::new(lines)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::left()))
                .to_string();
            println!("{table}");
        }
        println!("Reports written to {}", self.out.display());
    }
}
