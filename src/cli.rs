//! Command-line interface parsing for lmsarchive
//!
//! This module handles parsing of CLI arguments using clap. Subcommands
//! take positional resource paths, matching how the original one-off
//! scripts were invoked with bare paths.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// --out writes one destination file, so it takes exactly one path
    #[error("--out takes exactly one PATH, got {0}")]
    OutWithManyPaths(usize),
}

/// lmsarchive - archive a school LMS through a disk-backed response cache
#[derive(Parser, Debug)]
#[command(name = "lmsarchive")]
#[command(about = "Archive a school LMS's REST and HTML resources through a disk-backed response cache")]
#[command(version)]
pub struct Cli {
    /// Cache directory (default ./cache)
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Path to api-creds.json (default ./api-creds.json, then the user
    /// config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub creds: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch resources through the session cache, printing each body
    Fetch {
        /// Resource paths, e.g. /v1/users/me
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,

        /// Fetch HTML pages instead of JSON resources
        #[arg(long)]
        html: bool,

        /// Persist 403s as known-forbidden cache sentinels instead of
        /// failing the run
        #[arg(long)]
        allow_forbidden: bool,

        /// Do not retry once after HTTP 429
        #[arg(long)]
        no_retry: bool,

        /// Download a single resource to this file instead of printing it
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Resolve resources through the signed bulk API, 50 per round trip
    #[command(name = "multiget")]
    MultiGet {
        /// Resource paths, e.g. /v1/sections/12345
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,

        /// Persist per-item 403s as sentinels; they print as null
        #[arg(long)]
        allow_forbidden: bool,
    },

    /// Archive the logged-in user's sections and write an index page
    Archive {
        /// Output directory for archive pages
        #[arg(long, value_name = "DIR", default_value = "private")]
        out: PathBuf,
    },
}

impl Command {
    /// Checks constraints clap cannot express.
    ///
    /// # Returns
    /// * `Ok(())` if the arguments are consistent
    /// * `Err(CliError)` for a `fetch --out` with more than one path
    pub fn validate(&self) -> Result<(), CliError> {
        if let Command::Fetch { paths, out: Some(_), .. } = self {
            if paths.len() != 1 {
                return Err(CliError::OutWithManyPaths(paths.len()));
            }
        }
        Ok(())
    }
}

/// Normalizes a positional resource path to carry the leading slash the
/// school API expects, so `v1/users/me` and `/v1/users/me` behave alike.
pub fn normalize_path(arg: &str) -> String {
    if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("/{}", arg)
    }
}
