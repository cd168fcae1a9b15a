//! CLI argument definitions for the Snapshare credential tool.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Snapshare -- obtain and refresh upload credentials.
#[derive(Parser)]
#[command(
    name = "snapshare-auth",
    version,
    about = "Snapshare -- obtain and refresh cloud upload credentials",
    long_about = "Runs the OAuth 1.0a or OAuth 2.0 flow described by a service \
                  configuration file and prints the resulting token state."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize (or refresh) and print the token state as JSON.
    Authorize {
        /// Service configuration file (TOML).
        config: PathBuf,

        /// Log the authorization URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },

    /// Print the OAuth2 authorization URL without opening a browser.
    AuthUrl {
        /// Service configuration file (TOML).
        config: PathBuf,
    },

    /// Show whether the configured tokens are usable.
    Status {
        /// Service configuration file (TOML).
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
