//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bi-directional sync between a local folder and a cloud shared folder
#[derive(Parser)]
#[command(name = "drivesync", version, about)]
pub struct Cli {
    /// Daemon mode: do not announce the dashboard URL
    #[arg(long)]
    pub no_gui: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file path (defaults to ~/.drivesync/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port for the local control surface
    #[arg(long, default_value_t = 8050)]
    pub port: u16,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the sync daemon and the control surface (the default)
    Run,

    /// Run one full reconciliation and exit
    Sync,

    /// Print the current status as JSON
    Status,
}
