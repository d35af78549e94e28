//! capture-sentinel CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use capture_sentinel::cli::{commands, handle_error, Cli, Commands};
use capture_sentinel::infrastructure::config::ConfigLoader;
use capture_sentinel::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let log_config = config
        .as_ref()
        .map_or_else(|_| LogConfig::default(), |c| LogConfig::from(&c.logging));
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Config(args) => commands::config::execute(args, config, cli.json),
        Commands::Replay(args) => match config {
            Ok(config) => commands::replay::execute(args, config, cli.json).await,
            Err(err) => Err(err),
        },
        Commands::Lease(args) => match config {
            Ok(config) => commands::lease::execute(args, config, cli.json).await,
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            handle_error(err, cli.json);
            ExitCode::FAILURE
        }
    }
}

