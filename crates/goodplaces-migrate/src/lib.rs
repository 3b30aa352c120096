//! Command line front end for the Goodplaces migration ledger.
//!
//! Loads configuration, opens the SQLite database and drives the bundled
//! history from `goodplaces-migrations` through a [`goodplaces_ledger::Runner`].
//! Results are rendered as text or JSON by [`output::Output`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

use cli::Command;
use config::Config;
use error::CliError;
use output::Output;

/// Builds the bundled graph and runs `command`.
///
/// # Errors
///
/// Returns [`CliError::Graph`] if the bundled history is malformed, or
/// whatever the command fails with.
pub fn run(command: &Command, config: &Config) -> Result<Output, CliError> {
    let graph = goodplaces_migrations::graph()?;
    tracing::debug!(revisions = graph.len(), "loaded migration history");
    commands::execute(command, config, &graph)
}
