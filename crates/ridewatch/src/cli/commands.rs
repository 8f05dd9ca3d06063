//! CLI subcommand arguments.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Replay a recorded trip.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Trip configuration (JSON, camelCase fields)
    #[arg(short, long, value_name = "FILE")]
    pub trip: PathBuf,

    /// Recorded positions (JSON array of {lat, lng, accuracyMeters, timestamp})
    #[arg(short, long, value_name = "FILE")]
    pub positions: PathBuf,

    /// Trip id; a stored trip with the same id is resumed
    #[arg(long)]
    pub trip_id: Option<String>,

    /// Replay speed multiplier (60 plays one minute per second)
    #[arg(short, long, default_value_t = 1.0)]
    pub speedup: f64,

    /// Do not load or save snapshots
    #[arg(long)]
    pub no_persist: bool,
}

/// Show persisted trips.
#[derive(Debug, Args)]
pub struct SnapshotCommand {
    /// Trip to show; lists stored trip ids when omitted
    pub trip_id: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the configuration file path
    Path,

    /// Load and validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
