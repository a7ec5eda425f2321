// src/reclaim/mod.rs

//! Stale-claim reclaimer.
//!
//! A claim is stale once `now - claimed_at` exceeds the budget. Whether the
//! owner is still alive is not checked, and evidence appends do not extend
//! the budget; only a fresh claim resets `claimed_at`.

pub mod monitor;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::claim::{ClaimPolicy, ClaimProtocol};
use crate::errors::{GridError, Result};
use crate::store::{Task, TaskFilter, TaskStatus, TaskStore};
use crate::types::{ActorId, TaskId};

pub use monitor::{MonitorOptions, SweepReport, run_monitor};

/// Lock owner used for administrative releases.
pub const RECLAIMER_ACTOR: &str = "reclaimer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimedTask {
    pub id: TaskId,
    pub previous_owner: ActorId,
    pub claimed_at: DateTime<Utc>,
    pub held_for_ms: i64,
}

/// In-progress tasks from `tasks` whose claim is older than `stale_after`.
/// A zero budget selects nothing.
pub fn stale_claims<'t>(
    tasks: &'t [Task],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<&'t Task> {
    if stale_after.is_zero() {
        return Vec::new();
    }
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .filter(|t| {
            t.claimed_at
                .and_then(|at| (now - at).to_std().ok())
                .is_some_and(|held| held > stale_after)
        })
        .collect()
}

pub struct Reclaimer<'a> {
    store: &'a TaskStore,
}

impl<'a> Reclaimer<'a> {
    pub fn new(store: &'a TaskStore) -> Self {
        Self { store }
    }

    /// Release every claim older than `stale_after`. Returns what was
    /// released; a second sweep right after returns nothing.
    ///
    /// Claims that changed between the listing and the lock (resolved,
    /// released, re-claimed) are left alone. A task whose lock stays busy
    /// is skipped until the next sweep.
    pub fn sweep(&self, stale_after: Duration) -> Result<Vec<ReclaimedTask>> {
        if stale_after.is_zero() {
            debug!("reclaim disabled (stale_after = 0)");
            return Ok(Vec::new());
        }

        let tasks = self.store.list(&TaskFilter {
            status: Some(TaskStatus::InProgress),
            ..TaskFilter::default()
        })?;
        let now = self.store.clock().now();
        let claims = ClaimProtocol::new(self.store, ClaimPolicy::default());

        let mut released = Vec::new();
        for task in stale_claims(&tasks, now, stale_after) {
            let (Some(owner), Some(claimed_at)) = (task.claimed_by.as_deref(), task.claimed_at)
            else {
                continue;
            };
            match claims.release_claim(&task.id, RECLAIMER_ACTOR, owner, claimed_at) {
                Ok(Some(_)) => {
                    let held_for_ms = (now - claimed_at).num_milliseconds();
                    warn!(task = %task.id, owner = %owner, held_for_ms, "stale claim reclaimed");
                    released.push(ReclaimedTask {
                        id: task.id.clone(),
                        previous_owner: owner.to_string(),
                        claimed_at,
                        held_for_ms,
                    });
                }
                Ok(None) => {
                    debug!(task = %task.id, "claim changed before reclaim; skipped");
                }
                Err(e @ GridError::Contention { .. }) => {
                    debug!(task = %task.id, error = %e, "task busy; retry next sweep");
                }
                Err(e) => return Err(e),
            }
        }

        if !released.is_empty() {
            info!(count = released.len(), "reclaim sweep released tasks");
        }
        Ok(released)
    }
}
