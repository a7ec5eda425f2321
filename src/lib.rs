// src/lib.rs

//! File-based coordination of independent worker processes: locks, task
//! claims, execution waves, stale-claim reclaiming and per-actor mailboxes,
//! all stored under one shared directory tree.

pub mod claim;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod dag;
pub mod errors;
pub mod fs;
pub mod grid;
pub mod layout;
pub mod lock;
pub mod logging;
pub mod mailbox;
pub mod plan;
pub mod reclaim;
pub mod retry;
pub mod store;
pub mod types;

use tracing::debug;

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, load_or_default};
use crate::errors::Result;

pub use crate::errors::GridError;
pub use crate::grid::Grid;

/// High-level entry point used by `main.rs`.
///
/// Loads the config (an explicit `--config` must exist; the default
/// `<root>/taskgrid.toml` is optional), opens the team and runs the
/// command.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_and_validate(path)?,
        None => load_or_default(default_config_path(&args.root))?,
    };
    debug!(root = ?args.root, project = %args.project, team = %args.team, "opening grid");

    let grid = Grid::open(&args.root, &args.project, &args.team, config)?;
    let actor = args.actor();
    commands::dispatch(grid, actor, args.command).await
}
