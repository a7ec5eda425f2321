// src/reclaim/monitor.rs

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::errors::{GridError, Result};
use crate::reclaim::{ReclaimedTask, Reclaimer};
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub interval: Duration,
    pub stale_after: Duration,
    /// Stop after this many sweeps; `None` runs until shutdown.
    pub iterations: Option<u64>,
}

/// Outcome of one monitor sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub sweep: u64,
    pub at: DateTime<Utc>,
    pub released: Vec<ReclaimedTask>,
}

/// Sweep on a fixed interval until `shutdown` resolves or the iteration
/// cap is reached. The first sweep runs immediately.
///
/// Each sweep runs on the blocking pool; `on_sweep` sees every report.
/// Returns the number of sweeps performed.
pub async fn run_monitor<S, F>(
    store: TaskStore,
    options: MonitorOptions,
    shutdown: S,
    mut on_sweep: F,
) -> Result<u64>
where
    S: Future<Output = ()>,
    F: FnMut(&SweepReport) -> Result<()>,
{
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        interval_ms = options.interval.as_millis() as u64,
        stale_after_ms = options.stale_after.as_millis() as u64,
        "reclaim monitor started"
    );

    let mut sweeps = 0u64;
    loop {
        if options.iterations.is_some_and(|n| sweeps >= n) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!(sweeps, "reclaim monitor stopping");
                break;
            }
        }

        let sweep_store = store.clone();
        let stale_after = options.stale_after;
        let released = tokio::task::spawn_blocking(move || {
            Reclaimer::new(&sweep_store).sweep(stale_after)
        })
        .await
        .map_err(|e| GridError::Other(anyhow::Error::new(e)))??;

        sweeps += 1;
        debug!(sweep = sweeps, released = released.len(), "sweep finished");
        on_sweep(&SweepReport {
            sweep: sweeps,
            at: store.clock().now(),
            released,
        })?;
    }
    Ok(sweeps)
}
