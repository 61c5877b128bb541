//! Command-line surface.

pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "ghostpilot",
    about = "Autonomous browser orchestration engine",
    version
)]
pub struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write logs to this directory.
    #[arg(long, global = true)]
    pub log_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a natural-language task against a starting URL.
    Run(commands::RunArgs),
    /// Warm the context pool and print its snapshot and telemetry.
    Pool(commands::PoolArgs),
    /// Print version and build information.
    Version,
}
