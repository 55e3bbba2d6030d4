//! Schema command - print the JSON schema of the configuration file

use crate::core::RunConfig;
use clap::Args;
use schemars::schema_for;

#[derive(Args, Debug)]
pub struct SchemaCommand {}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let schema = schema_for!(RunConfig);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        Ok(())
    }
}
