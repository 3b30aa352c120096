//! Command line definition.

use clap::{Parser, Subcommand};

/// Goodplaces schema migrations
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file. Falls back to
    /// GOODPLACES_CONFIG_PATH, then goodplaces.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply revisions up to a target
    Upgrade {
        /// Target revision, prefix, `head`, `heads` or `<label>@head`
        #[arg(default_value = "heads")]
        target: String,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert revisions down to a target
    Downgrade {
        /// Target revision, prefix or `base`
        target: String,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the revisions recorded in the database
    Current,

    /// List every revision, newest first
    History,

    /// List the head revisions
    Heads,

    /// Show one revision and its steps
    Show {
        /// Revision or unique prefix
        revision: String,
    },

    /// Record a revision without running any steps
    Stamp {
        /// Target revision, prefix, `head`, `heads` or `base`
        target: String,
    },

    /// Fail unless the database is at the latest revision
    Check,

    /// Clear a migration lock left behind by a crashed run
    Unlock,
}
