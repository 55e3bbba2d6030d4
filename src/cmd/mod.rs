pub mod check;
pub mod run;
pub mod schema;

use crate::core::{ReconError, RunConfig, Warning};
use anyhow::Context;
use std::path::Path;

/// Read and validate a configuration file; defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(RunConfig, Vec<Warning>)> {
    match path {
        None => Ok((RunConfig::default(), Vec::new())),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading configuration {}", path.display()))?;
            let (config, warnings) = RunConfig::from_toml(&text).map_err(ReconError::Config)?;
            for warning in &warnings {
                log::warn!("{warning}");
            }
            Ok((config, warnings))
        }
    }
}
