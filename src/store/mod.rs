// src/store/mod.rs

//! Durable task records, one JSON file per task.
//!
//! [`TaskStore::update`] is the single serialization point for mutations:
//! lock the task file, read it, apply the mutator, validate, write it back
//! atomically, unlock. Claim, release, resolve and evidence appends all
//! funnel through it.

pub mod task;
pub mod validate;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::errors::{GridError, Result};
use crate::fs::FileSystem;
use crate::layout::{TeamLayout, TeamMeta, parse_json, read_team_meta, write_json};
use crate::lock::LockManager;
use crate::types::{Phase, TaskId, validate_id};

pub use task::{Evidence, EvidenceRecord, Task, TaskStatus};

/// Criteria for [`TaskStore::list`]. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub role: Option<String>,
    pub owner: Option<String>,
    pub wave: Option<u32>,
    /// Only open tasks whose dependencies are all resolved.
    pub ready: bool,
}

impl TaskFilter {
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }
}

/// Per-status and per-wave counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub ready: usize,
    pub by_wave: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    fs: Arc<dyn FileSystem>,
    layout: TeamLayout,
    locks: LockManager,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        layout: TeamLayout,
        locks: LockManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fs,
            layout,
            locks,
            clock,
        }
    }

    pub fn layout(&self) -> &TeamLayout {
        &self.layout
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Create the team directory tree and `team.json`.
    ///
    /// Idempotent: an existing `team.json` is returned untouched.
    pub fn init_team(&self, owner: &str) -> Result<TeamMeta> {
        self.layout.ensure_dirs(self.fs.as_ref())?;
        let path = self.layout.team_file();
        self.locks.with_lock(&path, owner, || {
            if self.fs.is_file(&path) {
                return read_team_meta(self.fs.as_ref(), &self.layout);
            }
            let meta = TeamMeta::new(&self.layout, self.clock.now());
            write_json(self.fs.as_ref(), &path, &meta)?;
            info!(project = %meta.project, team = %meta.team, "team initialised");
            Ok(meta)
        })
    }

    pub fn meta(&self) -> Result<TeamMeta> {
        read_team_meta(self.fs.as_ref(), &self.layout)
    }

    /// Locked read-modify-write of `team.json`.
    pub fn update_meta<F>(&self, owner: &str, mutator: F) -> Result<TeamMeta>
    where
        F: FnOnce(&mut TeamMeta) -> Result<()>,
    {
        let path = self.layout.team_file();
        self.locks.with_lock(&path, owner, || {
            let prev = read_team_meta(self.fs.as_ref(), &self.layout)?;
            let mut next = prev.clone();
            mutator(&mut next)?;
            if next == prev {
                return Ok(prev);
            }
            next.updated_at = self.clock.now();
            write_json(self.fs.as_ref(), &path, &next)?;
            Ok(next)
        })
    }

    /// Persist a new open task.
    ///
    /// The id must be unused, and every `blocked_by` id must already exist.
    pub fn create(&self, task: Task, creator: &str) -> Result<Task> {
        validate_id("task", &task.id)?;
        read_team_meta(self.fs.as_ref(), &self.layout)?;
        self.validate_dependencies(&task)?;

        self.fs.create_dir_all(&self.layout.tasks_dir())?;
        let path = self.layout.task_file(&task.id);
        let created = self.locks.with_lock(&path, creator, || {
            if self.fs.exists(&path) {
                return Err(GridError::Validation(format!(
                    "task '{}' already exists",
                    task.id
                )));
            }
            let now = self.clock.now();
            let mut record = task;
            record.status = TaskStatus::Open;
            record.claimed_by = None;
            record.claimed_at = None;
            record.completed_at = None;
            record.evidence.clear();
            record.created_at = now;
            record.updated_at = now;
            self.write(&path, &record)?;
            Ok(record)
        })?;

        info!(task = %created.id, creator = %creator, deps = ?created.blocked_by, "task created");
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.try_get(id)?
            .ok_or_else(|| GridError::not_found("task", id))
    }

    pub fn try_get(&self, id: &str) -> Result<Option<Task>> {
        validate_id("task", id)?;
        let path = self.layout.task_file(id);
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        self.read(&path, id).map(Some)
    }

    /// Every task in the team, sorted by `(wave, id)`; unplanned tasks last.
    pub fn all(&self) -> Result<Vec<Task>> {
        let dir = self.layout.tasks_dir();
        if !self.fs.is_dir(&dir) {
            read_team_meta(self.fs.as_ref(), &self.layout)?;
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for path in self.fs.read_dir(&dir)? {
            if !self.fs.is_file(&path) || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let stem = stem.to_string();
            tasks.push(self.read(&path, &stem)?);
        }
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let all = self.all()?;
        let ready: HashSet<TaskId> = if filter.ready {
            let statuses = status_map(&all);
            all.iter()
                .filter(|t| is_ready(t, &statuses))
                .map(|t| t.id.clone())
                .collect()
        } else {
            HashSet::new()
        };
        Ok(all
            .into_iter()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.role.as_deref().is_none_or(|r| t.role.as_deref() == Some(r)))
            .filter(|t| {
                filter
                    .owner
                    .as_deref()
                    .is_none_or(|o| t.claimed_by.as_deref() == Some(o))
            })
            .filter(|t| filter.wave.is_none_or(|w| t.wave == Some(w)))
            .filter(|t| !filter.ready || ready.contains(&t.id))
            .collect())
    }

    pub fn summary(&self) -> Result<TaskSummary> {
        let all = self.all()?;
        let statuses = status_map(&all);
        let mut summary = TaskSummary {
            total: all.len(),
            ..TaskSummary::default()
        };
        for task in &all {
            match task.status {
                TaskStatus::Open => summary.open += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Resolved => summary.resolved += 1,
            }
            if is_ready(task, &statuses) {
                summary.ready += 1;
            }
            let wave = task
                .wave
                .map(|w| w.to_string())
                .unwrap_or_else(|| "unplanned".to_string());
            *summary.by_wave.entry(wave).or_default() += 1;
        }
        Ok(summary)
    }

    /// Dependencies of `task` that are not yet resolved (unknown ids count
    /// as unresolved).
    pub fn pending_dependencies(&self, task: &Task) -> Result<Vec<TaskId>> {
        let mut pending = Vec::new();
        for dep in &task.blocked_by {
            match self.try_get(dep)? {
                Some(t) if t.status == TaskStatus::Resolved => {}
                _ => pending.push(dep.clone()),
            }
        }
        Ok(pending)
    }

    /// Locked read-modify-write of one task.
    ///
    /// `mutator` runs inside the critical section against the freshly read
    /// record; its error aborts the update and leaves the file untouched.
    pub fn update<F>(&self, id: &str, owner: &str, mutator: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        validate_id("task", id)?;
        let path = self.layout.task_file(id);

        self.locks.with_lock(&path, owner, || {
            if !self.fs.is_file(&path) {
                return Err(GridError::not_found("task", id));
            }
            let prev = self.read(&path, id)?;
            let mut next = prev.clone();
            mutator(&mut next)?;
            validate::validate_update(&prev, &next)?;

            if next == prev {
                return Ok(prev);
            }
            next.updated_at = self.clock.now();
            self.write(&path, &next)?;
            debug!(task = %id, owner = %owner, status = %next.status, "task updated");
            Ok(next)
        })
    }

    /// Edit title and/or description of an open task.
    pub fn edit(
        &self,
        id: &str,
        owner: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Task> {
        self.update(id, owner, |task| {
            if task.status != TaskStatus::Open {
                return Err(GridError::InvalidTransition(format!(
                    "task '{}' is {}; only open tasks can be edited",
                    task.id, task.status
                )));
            }
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(description) = description {
                task.description = description;
            }
            Ok(())
        })
    }

    /// Administrative removal, allowed only while the team is planning and
    /// no other task depends on `id`.
    pub fn delete(&self, id: &str, owner: &str) -> Result<Task> {
        let meta = read_team_meta(self.fs.as_ref(), &self.layout)?;
        if meta.phase != Phase::Planning {
            return Err(GridError::InvalidTransition(format!(
                "tasks can only be deleted while planning (team is {})",
                meta.phase
            )));
        }

        let dependents: Vec<TaskId> = self
            .all()?
            .into_iter()
            .filter(|t| t.blocked_by.iter().any(|d| d == id))
            .map(|t| t.id)
            .collect();
        if !dependents.is_empty() {
            return Err(GridError::Validation(format!(
                "task '{id}' is a dependency of {dependents:?}"
            )));
        }

        let path = self.layout.task_file(id);
        let removed = self.locks.with_lock(&path, owner, || {
            if !self.fs.is_file(&path) {
                return Err(GridError::not_found("task", id));
            }
            let task = self.read(&path, id)?;
            self.fs.remove_file(&path)?;
            Ok(task)
        })?;
        info!(task = %id, owner = %owner, "task deleted");
        Ok(removed)
    }

    fn validate_dependencies(&self, task: &Task) -> Result<()> {
        for (i, dep) in task.blocked_by.iter().enumerate() {
            validate_id("task", dep)?;
            if dep == &task.id {
                return Err(GridError::Validation(format!(
                    "task '{}' cannot depend on itself",
                    task.id
                )));
            }
            if task.blocked_by[..i].contains(dep) {
                return Err(GridError::Validation(format!(
                    "task '{}' lists dependency '{}' twice",
                    task.id, dep
                )));
            }
            if !self.fs.is_file(&self.layout.task_file(dep)) {
                return Err(GridError::Validation(format!(
                    "task '{}' has unknown dependency '{}' in blocked_by",
                    task.id, dep
                )));
            }
        }
        Ok(())
    }

    fn read(&self, path: &Path, id: &str) -> Result<Task> {
        let raw = self.fs.read_to_string(path)?;
        let task: Task = parse_json(path, &raw)?;
        if task.id != id {
            return Err(GridError::CorruptState {
                path: path.to_path_buf(),
                reason: format!("file holds task '{}'", task.id),
            });
        }
        Ok(task)
    }

    fn write(&self, path: &Path, task: &Task) -> Result<()> {
        write_json(self.fs.as_ref(), path, task)
    }
}

pub(crate) fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        (a.wave.unwrap_or(u32::MAX), &a.id).cmp(&(b.wave.unwrap_or(u32::MAX), &b.id))
    });
}

pub(crate) fn status_map(tasks: &[Task]) -> HashMap<&str, TaskStatus> {
    tasks.iter().map(|t| (t.id.as_str(), t.status)).collect()
}

/// Open, with every dependency present and resolved.
pub(crate) fn is_ready(task: &Task, statuses: &HashMap<&str, TaskStatus>) -> bool {
    task.status == TaskStatus::Open
        && task
            .blocked_by
            .iter()
            .all(|d| statuses.get(d.as_str()) == Some(&TaskStatus::Resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::fs::mock::MockFileSystem;
    use crate::lock::LockOptions;

    fn store() -> (MockFileSystem, TaskStore) {
        let fs = MockFileSystem::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        let locks = LockManager::new(Arc::new(fs.clone()), clock.clone(), LockOptions::default());
        let store = TaskStore::new(Arc::new(fs.clone()), layout, locks, clock);
        store.init_team("lead").unwrap();
        (fs, store)
    }

    #[test]
    fn init_team_is_idempotent() {
        let (_fs, store) = store();
        let first = store.meta().unwrap();
        let again = store.init_team("lead").unwrap();
        assert_eq!(first, again);
        assert_eq!(again.phase, Phase::Planning);
    }

    #[test]
    fn create_then_get_round_trips() {
        let (_fs, store) = store();
        let created = store
            .create(
                Task::new("T1", "Schema").with_role("backend").with_description("tables"),
                "planner",
            )
            .unwrap();
        let loaded = store.get("T1").unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.status, TaskStatus::Open);
        assert_eq!(loaded.role.as_deref(), Some("backend"));
    }

    #[test]
    fn create_rejects_unknown_and_duplicate() {
        let (_fs, store) = store();
        store.create(Task::new("T1", "a"), "planner").unwrap();

        let dup = store.create(Task::new("T1", "again"), "planner").unwrap_err();
        assert!(matches!(dup, GridError::Validation(_)));

        let unknown = store
            .create(Task::new("T2", "b").blocked_by(["nope"]), "planner")
            .unwrap_err();
        assert!(matches!(unknown, GridError::Validation(msg) if msg.contains("unknown dependency")));

        let selfdep = store
            .create(Task::new("T3", "c").blocked_by(["T3"]), "planner")
            .unwrap_err();
        assert!(matches!(selfdep, GridError::Validation(_)));
    }

    #[test]
    fn update_missing_task_is_not_found() {
        let (_fs, store) = store();
        let err = store.update("ghost", "w", |_| Ok(())).unwrap_err();
        assert!(matches!(err, GridError::NotFound { .. }));
    }

    #[test]
    fn failing_mutator_leaves_file_untouched() {
        let (_fs, store) = store();
        let before = store.create(Task::new("T1", "a"), "planner").unwrap();
        let err = store
            .update("T1", "w", |t| {
                t.title = "changed".into();
                Err(GridError::Validation("abort".into()))
            })
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
        assert_eq!(store.get("T1").unwrap(), before);
        assert!(store.locks().holder(&store.layout().task_file("T1")).unwrap().is_none());
    }

    #[test]
    fn corrupt_task_file_halts_listing() {
        let (fs, store) = store();
        store.create(Task::new("T1", "a"), "planner").unwrap();
        fs.add_file(store.layout().task_file("T2"), "{ truncated");

        let err = store.all().unwrap_err();
        assert!(matches!(err, GridError::CorruptState { .. }));
    }

    #[test]
    fn ready_filter_requires_resolved_dependencies() {
        let (_fs, store) = store();
        store.create(Task::new("T1", "a"), "planner").unwrap();
        store
            .create(Task::new("T2", "b").blocked_by(["T1"]), "planner")
            .unwrap();

        let ready: Vec<String> = store
            .list(&TaskFilter::ready())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ready, vec!["T1".to_string()]);
    }

    #[test]
    fn delete_refuses_dependencies_and_execution() {
        let (_fs, store) = store();
        store.create(Task::new("T1", "a"), "planner").unwrap();
        store
            .create(Task::new("T2", "b").blocked_by(["T1"]), "planner")
            .unwrap();

        assert!(store.delete("T1", "planner").is_err());
        store.delete("T2", "planner").unwrap();
        assert!(store.try_get("T2").unwrap().is_none());

        store
            .update_meta("planner", |m| {
                m.phase = Phase::Executing;
                Ok(())
            })
            .unwrap();
        let err = store.delete("T1", "planner").unwrap_err();
        assert!(matches!(err, GridError::InvalidTransition(_)));
    }

    #[test]
    fn edit_only_while_open() {
        let (_fs, store) = store();
        store.create(Task::new("T1", "a"), "planner").unwrap();
        let edited = store
            .edit("T1", "planner", Some("renamed".into()), None)
            .unwrap();
        assert_eq!(edited.title, "renamed");

        store
            .update("T1", "w", |t| {
                t.status = TaskStatus::InProgress;
                t.claimed_by = Some("w".into());
                t.claimed_at = Some(chrono::Utc::now());
                Ok(())
            })
            .unwrap();
        assert!(store.edit("T1", "planner", Some("late".into()), None).is_err());
    }
}
