// src/commands/reclaim.rs

use std::time::Duration;

use serde_json::{Value, json};
use tracing::warn;

use crate::cli::ReclaimCommand;
use crate::errors::{GridError, Result};
use crate::grid::Grid;
use crate::reclaim::{MonitorOptions, run_monitor};

pub fn run(grid: &Grid, command: ReclaimCommand) -> Result<Value> {
    match command {
        ReclaimCommand::Sweep { stale_after_ms } => {
            let stale_after = stale_after_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| grid.config().reclaim_stale_after());
            let released = grid.reclaimer().sweep(stale_after)?;
            Ok(json!({ "released": released }))
        }
        ReclaimCommand::Monitor { .. } => Err(GridError::Validation(
            "reclaim monitor runs asynchronously".to_string(),
        )),
    }
}

/// `reclaim monitor`: one compact JSON line per sweep that released tasks.
pub async fn monitor(
    grid: Grid,
    interval_ms: Option<u64>,
    stale_after_ms: Option<u64>,
    iterations: Option<u64>,
) -> Result<()> {
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| grid.config().reclaim_interval());
    if interval.is_zero() {
        return Err(GridError::Validation("--interval-ms must be >= 1".to_string()));
    }
    let options = MonitorOptions {
        interval,
        stale_after: stale_after_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| grid.config().reclaim_stale_after()),
        iterations,
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C; stopping monitor");
        }
    };

    run_monitor(grid.tasks().clone(), options, shutdown, |report| {
        if !report.released.is_empty() {
            println!("{}", serde_json::to_string(report)?);
        }
        Ok(())
    })
    .await?;
    Ok(())
}
