//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::lease::LeaseArgs;
use super::commands::replay::ReplayArgs;

#[derive(Parser, Debug)]
#[command(name = "capture-sentinel")]
#[command(about = "Readiness reconciliation for intercepted chat responses", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .capture/
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSONL signal script through an engine
    Replay(ReplayArgs),

    /// Inspect and operate the shared probe lease store
    Lease(LeaseArgs),

    /// Show or validate the effective configuration
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_json_flag() {
        let cli =
            Cli::try_parse_from(["capture-sentinel", "lease", "show", "c1", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Lease(_)));
    }
}
