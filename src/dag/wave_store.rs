// src/dag/wave_store.rs

//! Persisted wave records (`waves.json`) and verification results.
//!
//! Wave status only moves forward:
//! `planning -> in_progress -> completed -> verified | failed`, and a failed
//! wave goes back to `in_progress` only by receiving a fix-up task.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dag::waves::compute_waves;
use crate::errors::{GridError, Result};
use crate::layout::{parse_json, write_json};
use crate::store::{Task, TaskStatus, TaskStore, status_map};
use crate::types::{ActorId, Phase, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Planning,
    InProgress,
    Completed,
    Verified,
    Failed,
}

impl WaveStatus {
    pub fn can_transition_to(self, next: WaveStatus) -> bool {
        use WaveStatus::*;
        matches!(
            (self, next),
            (Planning, InProgress)
                | (InProgress, Completed)
                | (Completed, Verified)
                | (Completed, Failed)
                | (Failed, InProgress)
        )
    }
}

impl fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaveStatus::Planning => "planning",
            WaveStatus::InProgress => "in_progress",
            WaveStatus::Completed => "completed",
            WaveStatus::Verified => "verified",
            WaveStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub id: u32,
    pub status: WaveStatus,
    pub tasks: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Contents of `waves.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveSet {
    pub planned_at: DateTime<Utc>,
    pub waves: Vec<Wave>,
}

/// One verification pass, stored as `verification/wave-<n>-<seq>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub wave: u32,
    pub seq: u32,
    pub passed: bool,
    #[serde(default)]
    pub notes: String,
    pub verified_by: ActorId,
    pub verified_at: DateTime<Utc>,
    pub tasks: Vec<TaskId>,
}

/// Wave operations on top of a team's [`TaskStore`].
///
/// Every mutation holds the lock on `waves.json`; task `wave` fields are
/// written through [`TaskStore::update`] inside that section.
pub struct WaveStore<'a> {
    store: &'a TaskStore,
}

impl<'a> WaveStore<'a> {
    pub fn new(store: &'a TaskStore) -> Self {
        Self { store }
    }

    /// Compute waves from the current task set and persist them.
    ///
    /// Only allowed while the team is planning. A cycle aborts before
    /// anything is written. `waves.json` is written before the tasks'
    /// `wave` fields; if a task update fails, both are rolled back.
    pub fn plan(&self, actor: &str) -> Result<Vec<Wave>> {
        let meta = self.store.meta()?;
        if meta.phase != Phase::Planning {
            return Err(GridError::InvalidTransition(format!(
                "waves can only be planned while planning (team is {})",
                meta.phase
            )));
        }

        let path = self.store.layout().waves_file();
        let waves = self.store.locks().with_lock(&path, actor, || {
            let tasks = self.store.all()?;
            let plans = compute_waves(&tasks)?;
            let waves: Vec<Wave> = plans
                .into_iter()
                .map(|p| Wave {
                    id: p.id,
                    status: WaveStatus::Planning,
                    tasks: p.tasks,
                    started_at: None,
                    completed_at: None,
                    verified_at: None,
                })
                .collect();

            let previous = self.read()?;
            self.write(&WaveSet {
                planned_at: self.store.clock().now(),
                waves: waves.clone(),
            })?;
            if let Err(e) = self.assign_waves(&tasks, &waves, actor) {
                self.restore(previous.as_ref());
                return Err(e);
            }
            Ok(waves)
        })?;

        info!(waves = waves.len(), actor = %actor, "waves planned");
        Ok(waves)
    }

    /// Persisted waves; empty before the first plan.
    pub fn list(&self) -> Result<Vec<Wave>> {
        Ok(self.read()?.map(|set| set.waves).unwrap_or_default())
    }

    pub fn get(&self, id: u32) -> Result<Wave> {
        self.list()?
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| GridError::not_found("wave", id.to_string()))
    }

    /// Open a planned wave for work. Every earlier wave must be verified.
    pub fn start(&self, id: u32, actor: &str) -> Result<Wave> {
        let started = self.mutate(actor, |set, now| {
            if let Some(open) = set.waves.iter().find(|w| w.id < id && w.status != WaveStatus::Verified) {
                return Err(GridError::InvalidTransition(format!(
                    "wave {} cannot start: wave {} is {}",
                    id, open.id, open.status
                )));
            }
            let wave = find_mut(set, id)?;
            transition(wave, WaveStatus::InProgress)?;
            wave.started_at = Some(now);
            Ok(wave.clone())
        })?;

        self.store.update_meta(actor, |meta| {
            meta.phase = Phase::Executing;
            Ok(())
        })?;
        info!(wave = id, actor = %actor, "wave started");
        Ok(started)
    }

    /// Mark every in-progress wave whose tasks are all resolved as completed.
    /// Returns the ids that changed.
    pub fn refresh(&self, actor: &str) -> Result<Vec<u32>> {
        let tasks = self.store.all()?;
        let statuses = status_map(&tasks);

        let completed = self.mutate(actor, |set, now| {
            let mut completed = Vec::new();
            for wave in set.waves.iter_mut() {
                let done = wave.status == WaveStatus::InProgress
                    && wave
                        .tasks
                        .iter()
                        .all(|id| statuses.get(id.as_str()) == Some(&TaskStatus::Resolved));
                if done {
                    transition(wave, WaveStatus::Completed)?;
                    wave.completed_at = Some(now);
                    completed.push(wave.id);
                }
            }
            Ok(completed)
        })?;

        if !completed.is_empty() {
            info!(waves = ?completed, "waves completed");
        }
        Ok(completed)
    }

    /// Record the outcome of verifying a completed wave.
    pub fn verify(
        &self,
        id: u32,
        passed: bool,
        notes: impl Into<String>,
        verifier: &str,
    ) -> Result<VerificationRecord> {
        let notes = notes.into();
        let record = self.mutate(verifier, |set, now| {
            let wave = find_mut(set, id)?;
            let next = if passed {
                WaveStatus::Verified
            } else {
                WaveStatus::Failed
            };
            transition(wave, next)?;
            if passed {
                wave.verified_at = Some(now);
            }

            let record = VerificationRecord {
                wave: id,
                seq: self.verifications(id)?.len() as u32 + 1,
                passed,
                notes,
                verified_by: verifier.to_string(),
                verified_at: now,
                tasks: wave.tasks.clone(),
            };
            let fs = self.store.fs().as_ref();
            fs.create_dir_all(&self.store.layout().verification_dir())?;
            write_json(fs, &self.record_path(id, record.seq), &record)?;
            Ok(record)
        })?;

        if passed {
            info!(wave = id, verifier = %verifier, "wave verified");
        } else {
            warn!(wave = id, verifier = %verifier, notes = %record.notes, "wave failed verification");
        }
        Ok(record)
    }

    /// Reopen a failed wave by adding a fix-up task to it.
    ///
    /// The task's dependencies must be placed in strictly earlier waves.
    pub fn add_fixup(&self, id: u32, task: Task, actor: &str) -> Result<Task> {
        let created = self.mutate(actor, |set, _now| {
            for dep in &task.blocked_by {
                let placed = set
                    .waves
                    .iter()
                    .any(|w| w.id < id && w.tasks.iter().any(|t| t == dep));
                if !placed {
                    return Err(GridError::Validation(format!(
                        "fix-up dependency '{dep}' is not in a wave before {id}"
                    )));
                }
            }

            let wave = find_mut(set, id)?;
            if wave.status != WaveStatus::Failed {
                return Err(GridError::InvalidTransition(format!(
                    "wave {} is {}; fix-ups go into failed waves",
                    id, wave.status
                )));
            }
            let created = self.store.create(task.with_wave(id), actor)?;
            wave.tasks.push(created.id.clone());
            transition(wave, WaveStatus::InProgress)?;
            wave.completed_at = None;
            Ok(created)
        })?;

        info!(wave = id, task = %created.id, actor = %actor, "fix-up task added");
        Ok(created)
    }

    /// Verification records for a wave, oldest first.
    pub fn verifications(&self, id: u32) -> Result<Vec<VerificationRecord>> {
        let fs = self.store.fs().as_ref();
        let dir = self.store.layout().verification_dir();
        if !fs.is_dir(&dir) {
            return Ok(Vec::new());
        }
        let prefix = format!("wave-{id}-");
        let mut records = Vec::new();
        for path in fs.read_dir(&dir)? {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"));
            if !matches {
                continue;
            }
            let raw = fs.read_to_string(&path)?;
            let record: VerificationRecord = parse_json(&path, &raw)?;
            if record.wave == id {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// Write each task's `wave`. On failure, tasks already changed get
    /// their previous value back.
    fn assign_waves(&self, tasks: &[Task], waves: &[Wave], actor: &str) -> Result<()> {
        let previous: HashMap<&str, Option<u32>> =
            tasks.iter().map(|t| (t.id.as_str(), t.wave)).collect();
        let mut changed: Vec<&str> = Vec::new();

        for wave in waves {
            for id in &wave.tasks {
                if previous.get(id.as_str()) == Some(&Some(wave.id)) {
                    continue;
                }
                let result = self.store.update(id, actor, |t| {
                    t.wave = Some(wave.id);
                    Ok(())
                });
                if let Err(e) = result {
                    for done in changed {
                        let old = previous.get(done).copied().flatten();
                        if let Err(undo) = self.store.update(done, actor, |t| {
                            t.wave = old;
                            Ok(())
                        }) {
                            warn!(task = %done, error = %undo, "could not restore task wave");
                        }
                    }
                    return Err(e);
                }
                changed.push(id.as_str());
            }
        }
        Ok(())
    }

    /// Put back the wave set that was there before a failed plan.
    fn restore(&self, previous: Option<&WaveSet>) {
        let fs = self.store.fs().as_ref();
        let path = self.store.layout().waves_file();
        let restored = match previous {
            Some(set) => self.write(set),
            None => fs.remove_file(&path).map_err(GridError::from),
        };
        if let Err(e) = restored {
            warn!(error = %e, "could not restore waves file after failed plan");
        }
    }

    fn record_path(&self, wave: u32, seq: u32) -> PathBuf {
        self.store
            .layout()
            .verification_dir()
            .join(format!("wave-{wave}-{seq}.json"))
    }

    /// Locked read-modify-write of `waves.json`.
    fn mutate<T, F>(&self, actor: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut WaveSet, DateTime<Utc>) -> Result<T>,
    {
        let path = self.store.layout().waves_file();
        self.store.locks().with_lock(&path, actor, || {
            let mut set = self.read()?.ok_or_else(|| {
                GridError::InvalidTransition("no waves planned yet".to_string())
            })?;
            let out = f(&mut set, self.store.clock().now())?;
            self.write(&set)?;
            Ok(out)
        })
    }

    fn read(&self) -> Result<Option<WaveSet>> {
        let fs = self.store.fs().as_ref();
        let path = self.store.layout().waves_file();
        if !fs.is_file(&path) {
            self.store.meta()?;
            return Ok(None);
        }
        let raw = fs.read_to_string(&path)?;
        parse_json(&path, &raw).map(Some)
    }

    fn write(&self, set: &WaveSet) -> Result<()> {
        write_json(
            self.store.fs().as_ref(),
            &self.store.layout().waves_file(),
            set,
        )
    }
}

fn find_mut(set: &mut WaveSet, id: u32) -> Result<&mut Wave> {
    set.waves
        .iter_mut()
        .find(|w| w.id == id)
        .ok_or_else(|| GridError::not_found("wave", id.to_string()))
}

fn transition(wave: &mut Wave, next: WaveStatus) -> Result<()> {
    if !wave.status.can_transition_to(next) {
        return Err(GridError::InvalidTransition(format!(
            "wave {}: {} -> {}",
            wave.id, wave.status, next
        )));
    }
    wave.status = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::claim::{ClaimPolicy, ClaimProtocol};
    use crate::clock::{Clock, SystemClock};
    use crate::fs::mock::MockFileSystem;
    use crate::layout::TeamLayout;
    use crate::lock::{LockManager, LockOptions};
    use crate::store::Evidence;

    fn store() -> TaskStore {
        store_with(LockOptions::default())
    }

    fn store_with(options: LockOptions) -> TaskStore {
        let fs = MockFileSystem::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        let locks = LockManager::new(Arc::new(fs.clone()), clock.clone(), options);
        let store = TaskStore::new(Arc::new(fs), layout, locks, clock);
        store.init_team("lead").unwrap();
        store.create(Task::new("T1", "schema"), "lead").unwrap();
        store
            .create(Task::new("T2", "api").blocked_by(["T1"]), "lead")
            .unwrap();
        store
    }

    fn finish(store: &TaskStore, id: &str) {
        let claims = ClaimProtocol::new(store, ClaimPolicy::default());
        claims.claim_task(id, "w", None, false).unwrap();
        claims
            .resolve(id, "w", Some(Evidence::Note { text: "done".into() }))
            .unwrap();
    }

    #[test]
    fn plan_assigns_waves_to_tasks() {
        let store = store();
        let waves = WaveStore::new(&store).plan("lead").unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(store.get("T1").unwrap().wave, Some(1));
        assert_eq!(store.get("T2").unwrap().wave, Some(2));
        assert_eq!(WaveStore::new(&store).list().unwrap(), waves);
    }

    #[test]
    fn failed_plan_leaves_tasks_and_waves_untouched() {
        let store = store_with(LockOptions {
            timeout: std::time::Duration::from_millis(50),
            ..LockOptions::default()
        });
        let busy = store.layout().task_file("T2");
        let held = store
            .locks()
            .acquire(&busy, "someone-else", std::time::Duration::from_millis(50))
            .unwrap();

        let err = WaveStore::new(&store).plan("lead").unwrap_err();
        assert!(matches!(err, GridError::Contention { .. }));
        assert_eq!(store.get("T1").unwrap().wave, None);
        assert!(WaveStore::new(&store).list().unwrap().is_empty());

        store.locks().release_handle(held).unwrap();
        WaveStore::new(&store).plan("lead").unwrap();
        assert_eq!(store.get("T2").unwrap().wave, Some(2));
    }

    #[test]
    fn start_requires_previous_wave_verified() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();

        assert!(matches!(
            waves.start(2, "lead"),
            Err(GridError::InvalidTransition(_))
        ));
        waves.start(1, "lead").unwrap();
        assert_eq!(store.meta().unwrap().phase, Phase::Executing);

        // Planning is closed once execution begins.
        assert!(waves.plan("lead").is_err());
    }

    #[test]
    fn full_lifecycle_with_failed_verification_and_fixup() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();
        waves.start(1, "lead").unwrap();

        assert!(waves.refresh("lead").unwrap().is_empty());
        finish(&store, "T1");
        assert_eq!(waves.refresh("lead").unwrap(), vec![1]);

        let record = waves.verify(1, false, "schema missing index", "qa").unwrap();
        assert_eq!(record.seq, 1);
        assert!(!record.passed);
        assert_eq!(waves.get(1).unwrap().status, WaveStatus::Failed);

        let fix = waves
            .add_fixup(1, Task::new("T1-fix", "add index"), "lead")
            .unwrap();
        assert_eq!(fix.wave, Some(1));
        let wave = waves.get(1).unwrap();
        assert_eq!(wave.status, WaveStatus::InProgress);
        assert!(wave.tasks.contains(&"T1-fix".to_string()));

        finish(&store, "T1-fix");
        assert_eq!(waves.refresh("lead").unwrap(), vec![1]);
        let record = waves.verify(1, true, "", "qa").unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(waves.verifications(1).unwrap().len(), 2);

        waves.start(2, "lead").unwrap();
    }

    #[test]
    fn verify_requires_completed_wave() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();
        assert!(matches!(
            waves.verify(1, true, "", "qa"),
            Err(GridError::InvalidTransition(_))
        ));
    }

    #[test]
    fn fixup_rejects_dependencies_from_its_own_wave() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();
        waves.start(1, "lead").unwrap();
        finish(&store, "T1");
        waves.refresh("lead").unwrap();
        waves.verify(1, false, "", "qa").unwrap();

        let err = waves
            .add_fixup(1, Task::new("F", "fix").blocked_by(["T1"]), "lead")
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
        assert!(store.try_get("F").unwrap().is_none());
        assert_eq!(waves.get(1).unwrap().status, WaveStatus::Failed);
    }

    #[test]
    fn fixup_may_depend_on_earlier_waves() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();
        waves.start(1, "lead").unwrap();
        finish(&store, "T1");
        waves.refresh("lead").unwrap();
        waves.verify(1, true, "", "qa").unwrap();
        waves.start(2, "lead").unwrap();
        finish(&store, "T2");
        waves.refresh("lead").unwrap();
        waves.verify(2, false, "api incomplete", "qa").unwrap();

        let fix = waves
            .add_fixup(2, Task::new("F", "fix").blocked_by(["T1"]), "lead")
            .unwrap();
        let dep_wave = store.get("T1").unwrap().wave.unwrap();
        assert!(dep_wave < fix.wave.unwrap());
    }

    #[test]
    fn fixup_rejects_dependencies_from_later_waves() {
        let store = store();
        let waves = WaveStore::new(&store);
        waves.plan("lead").unwrap();
        waves.start(1, "lead").unwrap();
        finish(&store, "T1");
        waves.refresh("lead").unwrap();
        waves.verify(1, false, "", "qa").unwrap();

        let err = waves
            .add_fixup(1, Task::new("F", "fix").blocked_by(["T2"]), "lead")
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
        assert!(store.try_get("F").unwrap().is_none());
    }

    #[test]
    fn cycle_writes_nothing() {
        let store = store();
        // Dependencies are immutable through the store, so plant the cycle
        // by rewriting a record directly.
        let mut t1 = store.get("T1").unwrap();
        t1.blocked_by = vec!["T2".into()];
        write_json(
            store.fs().as_ref(),
            &store.layout().task_file("T1"),
            &t1,
        )
        .unwrap();

        let err = WaveStore::new(&store).plan("lead").unwrap_err();
        assert!(matches!(err, GridError::Cycle(_)));
        assert!(WaveStore::new(&store).list().unwrap().is_empty());
        assert_eq!(store.get("T2").unwrap().wave, None);
    }
}
