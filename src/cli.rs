use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Stage-based task tracker for projects and their modules.
/// Storage defaults to ~/.flowtask/flowtask.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "ft", version, about = "Workflow task tracker CLI")]
pub struct Cli {
    /// Path to the JSON snapshot file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Increase log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}
