//! `config` commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{action_failure, action_success, output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration hierarchy, or a single file
    Validate {
        /// File to validate instead of the .capture/ hierarchy
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub source: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        match &self.error {
            None => action_success(&format!("{} is valid", self.source)),
            Some(error) => action_failure(&format!("{} is invalid: {error}", self.source)),
        }
    }
}

pub fn validate(file: Option<PathBuf>) -> ValidateOutput {
    let (source, result) = match file {
        Some(path) => (path.display().to_string(), ConfigLoader::load_from_file(&path)),
        None => (".capture/".to_string(), ConfigLoader::load()),
    };
    ValidateOutput {
        source,
        valid: result.is_ok(),
        error: result.err().map(|e| format!("{e:#}")),
    }
}

pub fn execute(args: ConfigArgs, config: Result<Config>, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let config = config.context("Configuration is invalid")?;
            output(&ConfigShowOutput { config }, json_mode);
        }
        ConfigCommands::Validate { file } => {
            let result = validate(file);
            let valid = result.valid;
            output(&result, json_mode);
            if !valid {
                anyhow::bail!("configuration validation failed");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "logging:\n  level: loud\n").unwrap();

        let result = validate(Some(path));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("loud"));
    }

    #[test]
    fn test_validate_accepts_good_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "gate:\n  max_wait_ms: 10000\n").unwrap();

        assert!(validate(Some(path)).valid);
    }
}
