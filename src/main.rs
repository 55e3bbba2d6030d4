mod cmd;
mod core;
mod loader;
mod report;

use clap::{Parser, Subcommand};
use cmd::{check::CheckCommand, run::RunCommand, schema::SchemaCommand};
use crate::core::ReconError;

/// Reconcile a general-ledger export against a bank-statement export.
#[derive(Parser, Debug)]
#[command(name = "smartrecon", version, about)]
struct SmartRecon {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a reconciliation and write the report files
    Run(RunCommand),
    /// Validate configuration and column mappings without matching
    Check(CheckCommand),
    /// Print the JSON schema of the configuration file
    Schema(SchemaCommand),
}

impl Command {
    fn exec(&self) -> anyhow::Result<()> {
        match self {
            Command::Run(run) => run.exec(),
            Command::Check(check) => check.exec(),
            Command::Schema(schema) => schema.exec(),
        }
    }
}

fn main() {
    pretty_env_logger::init();
    let cli = SmartRecon::parse();
    if let Err(err) = cli.cmd.exec() {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// 0 success, 2 schema error, 3 parse exhaustion, 1 anything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ReconError>()
        .map(ReconError::exit_code)
        .unwrap_or(1)
}
