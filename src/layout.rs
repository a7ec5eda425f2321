// src/layout.rs

//! On-disk layout of one (project, team) namespace and its aggregate
//! metadata file.
//!
//! ```text
//! <root>/<project>/<team>/
//!   team.json
//!   tasks/<id>.json
//!   waves.json
//!   mailbox/<actor>.json
//!   verification/wave-<n>-<seq>.json
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{GridError, Result};
use crate::fs::FileSystem;
use crate::types::{Phase, validate_id};

pub const TEAM_FILE: &str = "team.json";
pub const WAVES_FILE: &str = "waves.json";
pub const CONFIG_FILE: &str = "taskgrid.toml";

/// Paths for one team directory.
#[derive(Debug, Clone)]
pub struct TeamLayout {
    root: PathBuf,
    project: String,
    team: String,
}

impl TeamLayout {
    pub fn new(root: impl Into<PathBuf>, project: &str, team: &str) -> Result<Self> {
        validate_id("project", project)?;
        validate_id("team", team)?;
        Ok(Self {
            root: root.into(),
            project: project.to_string(),
            team: team.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn team_dir(&self) -> PathBuf {
        self.root.join(&self.project).join(&self.team)
    }

    pub fn team_file(&self) -> PathBuf {
        self.team_dir().join(TEAM_FILE)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.team_dir().join("tasks")
    }

    pub fn task_file(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.json"))
    }

    pub fn waves_file(&self) -> PathBuf {
        self.team_dir().join(WAVES_FILE)
    }

    pub fn mailbox_dir(&self) -> PathBuf {
        self.team_dir().join("mailbox")
    }

    pub fn inbox_file(&self, actor: &str) -> PathBuf {
        self.mailbox_dir().join(format!("{actor}.json"))
    }

    pub fn verification_dir(&self) -> PathBuf {
        self.team_dir().join("verification")
    }

    /// Create every directory of the layout.
    pub fn ensure_dirs(&self, fs: &dyn FileSystem) -> Result<()> {
        fs.create_dir_all(&self.tasks_dir())?;
        fs.create_dir_all(&self.mailbox_dir())?;
        fs.create_dir_all(&self.verification_dir())?;
        Ok(())
    }
}

/// Contents of `team.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMeta {
    pub project: String,
    pub team: String,
    #[serde(default)]
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamMeta {
    pub fn new(layout: &TeamLayout, now: DateTime<Utc>) -> Self {
        Self {
            project: layout.project().to_string(),
            team: layout.team().to_string(),
            phase: Phase::Planning,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parse a JSON document, mapping failures to `CorruptState` for `path`.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| GridError::CorruptState {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
pub(crate) fn write_json<T: Serialize>(fs: &dyn FileSystem, path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs.write_atomic(path, &json)?;
    Ok(())
}

/// Read `team.json`; a missing file means the team was never initialised.
pub fn read_team_meta(fs: &dyn FileSystem, layout: &TeamLayout) -> Result<TeamMeta> {
    let path = layout.team_file();
    if !fs.is_file(&path) {
        return Err(GridError::not_found(
            "team",
            format!("{}/{}", layout.project(), layout.team()),
        ));
    }
    let raw = fs.read_to_string(&path)?;
    parse_json(&path, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn paths_are_namespaced() {
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        assert_eq!(layout.task_file("T1"), PathBuf::from("/grid/acme/core/tasks/T1.json"));
        assert_eq!(
            layout.inbox_file("lead"),
            PathBuf::from("/grid/acme/core/mailbox/lead.json")
        );
        assert_eq!(layout.waves_file(), PathBuf::from("/grid/acme/core/waves.json"));
    }

    #[test]
    fn rejects_traversal_in_namespace() {
        assert!(TeamLayout::new("/grid", "..", "core").is_err());
        assert!(TeamLayout::new("/grid", "acme", "a/b").is_err());
    }

    #[test]
    fn missing_team_is_not_found() {
        let fs = MockFileSystem::new();
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        let err = read_team_meta(&fs, &layout).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn garbage_team_file_is_corrupt() {
        let fs = MockFileSystem::new();
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        fs.add_file(layout.team_file(), "{not json");
        let err = read_team_meta(&fs, &layout).unwrap_err();
        assert!(matches!(err, GridError::CorruptState { .. }));
    }
}
