// src/commands/mod.rs

//! One thin handler per CLI command. Handlers return the JSON value that
//! goes to stdout; [`dispatch`] prints it.

pub mod mailbox;
pub mod reclaim;
pub mod task;
pub mod wave;

use serde::Serialize;
use serde_json::Value;

use crate::cli::{Command, MailboxCommand, ReclaimCommand};
use crate::errors::{GridError, Result};
use crate::grid::Grid;

/// Run a parsed command. Synchronous handlers run on the blocking pool.
pub async fn dispatch(grid: Grid, actor: String, command: Command) -> Result<()> {
    match command {
        Command::Reclaim {
            command:
                ReclaimCommand::Monitor {
                    interval_ms,
                    stale_after_ms,
                    iterations,
                },
        } => reclaim::monitor(grid, interval_ms, stale_after_ms, iterations).await,
        Command::Mailbox {
            command: MailboxCommand::Wait { actor, timeout_ms },
        } => {
            let value = mailbox::wait(&grid, &actor, timeout_ms).await?;
            emit(&value)
        }
        other => {
            let value = tokio::task::spawn_blocking(move || execute(&grid, &actor, other))
                .await
                .map_err(|e| GridError::Other(anyhow::Error::new(e)))??;
            emit(&value)
        }
    }
}

/// Run a synchronous command and return its JSON result.
pub fn execute(grid: &Grid, actor: &str, command: Command) -> Result<Value> {
    match command {
        Command::Init => to_json(grid.init(actor)?),
        Command::Status => to_json(grid.status()?),
        Command::Task { command } => task::run(grid, actor, command),
        Command::Plan { command } => task::run_plan(grid, actor, command),
        Command::Wave { command } => wave::run(grid, actor, command),
        Command::Reclaim { command } => reclaim::run(grid, command),
        Command::Mailbox { command } => mailbox::run(grid, command),
    }
}

pub(crate) fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Pretty JSON on stdout.
pub(crate) fn emit(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
