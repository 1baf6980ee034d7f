//! # flowtask - stage-based task tracker
//!
//! Projects run through workflows, ordered lists of stages. Each stage may carry a
//! checklist of template tasks (with template subtasks) that every board shows as
//! scaffolding. Projects are split into modules; a module may override the
//! project's workflow.
//!
//! ## Quick Start
//!
//! ```bash
//! ft stage add Plan --template "Kickoff:Agenda,Notes"
//! ft stage add Build
//! ft workflow add Default --stage Plan --stage Build
//! ft project add Apollo --workflow Default
//! ft module add Engine --project Apollo
//!
//! ft task add "Draft PRD" --stage Plan --module Engine --template-parent Kickoff
//! ft board --module Engine
//! ft dashboard --by stage --by status
//! ft ui
//! ```
//!
//! ## Key Commands
//!
//! - `ft stage|type|workflow|project|module ...` - Manage the vocabulary and hierarchy
//! - `ft task add|edit|view|delete|list|parents` - Task CRUD, cascade delete, parent choices
//! - `ft board` - Stage board with optional start/end/work-log time filter
//! - `ft dashboard` - Task counts grouped by stage, type, priority and status
//! - `ft ui` - Interactive board
//! - `ft snapshot` - Dump the whole store as JSON
//!
//! Data lives in a single JSON file, `~/.flowtask/flowtask.json` unless `--db` is given.

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

pub mod aggregate;
pub mod cascade;
pub mod cli;
pub mod cmd;
pub mod db;
pub mod error;
pub mod fields;
pub mod filter;
pub mod model;
pub mod selection;
pub mod tree;
pub mod tui {
    pub mod board;
    pub mod colors;
    pub mod run;
}

use cli::Cli;
use cmd::*;
use db::Database;
use error::Result;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    // A second initialisation only happens in tests; keep the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".flowtask").join("flowtask.json")
}

fn run(cli: Cli) -> Result<()> {
    let db_path = cli.db.unwrap_or_else(default_db_path);
    debug!(path = %db_path.display(), "using snapshot");

    // Commands that do not work on a loaded snapshot
    let command = match cli.command {
        Commands::Completions { shell } => {
            cmd_completions(shell);
            return Ok(());
        }
        Commands::Ui { project, module } => return cmd_ui(&db_path, project, module),
        other => other,
    };

    let mut db = Database::load(&db_path)?;

    match command {
        Commands::Stage { action } => cmd_stage(&mut db, &db_path, action),
        Commands::Type { action } => cmd_type(&mut db, &db_path, action),
        Commands::Workflow { action } => cmd_workflow(&mut db, &db_path, action),
        Commands::Project { action } => cmd_project(&mut db, &db_path, action),
        Commands::Module { action } => cmd_module(&mut db, &db_path, action),
        Commands::Task { action } => cmd_task(&mut db, &db_path, action),

        Commands::Board { scope, filter, from, to } => cmd_board(&db, scope, filter, from, to),

        Commands::Dashboard { project, modules, by, only, distinguish_modules } =>
            cmd_dashboard(&db, project, modules, by, only, distinguish_modules),

        Commands::Snapshot => cmd_snapshot(&db),

        Commands::Completions { .. } | Commands::Ui { .. } => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
