//! `goodplaces-migrate` binary.
//!
//! Logs go to stderr so that stdout only carries command output.

use std::process::ExitCode;

use clap::Parser;
use goodplaces_migrate::cli::Cli;
use goodplaces_migrate::config::{self, LoggingConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config_path, config_source) = config::resolve_config_path(cli.config.as_deref());

    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);
    tracing::debug!(
        source = config_source,
        path = %config_path,
        "resolved configuration path"
    );

    match goodplaces_migrate::run(&cli.command, &config) {
        Ok(output) if cli.json => match serde_json::to_string_pretty(&output) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize output");
                ExitCode::FAILURE
            }
        },
        Ok(output) => {
            let text = output.to_string();
            println!("{}", text.trim_end());
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
