// src/store/task.rs

//! Task record as persisted in `tasks/<id>.json`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActorId, TaskId};

/// Task lifecycle.
///
/// - `Open` -> `InProgress` (claim)
/// - `InProgress` -> `Open` (release / reclaim)
/// - `InProgress` -> `Resolved` (resolve)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Resolved,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Open, Open)
                | (InProgress, InProgress)
                | (Resolved, Resolved)
                | (Open, InProgress)
                | (InProgress, Open)
                | (InProgress, Resolved)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Open => write!(f, "open"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "resolved" => Ok(TaskStatus::Resolved),
            other => Err(format!(
                "invalid task status: {other} (expected open, in_progress or resolved)"
            )),
        }
    }
}

/// Structured evidence payload attached by the claiming worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    Test {
        name: String,
        passed: bool,
    },
    Note {
        text: String,
    },
    /// Recorded by the system, e.g. a non-strict role mismatch on claim.
    Warning {
        message: String,
    },
}

impl Evidence {
    pub fn is_warning(&self) -> bool {
        matches!(self, Evidence::Warning { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub recorded_by: ActorId,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub evidence: Evidence,
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
    #[serde(default)]
    pub claimed_by: Option<ActorId>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh open task. Timestamps are set by the store on create.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        let epoch = DateTime::<Utc>::default();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Open,
            role: None,
            blocked_by: Vec::new(),
            wave: None,
            claimed_by: None,
            claimed_at: None,
            completed_at: None,
            evidence: Vec::new(),
            created_at: epoch,
            updated_at: epoch,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn blocked_by<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.blocked_by = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_wave(mut self, wave: u32) -> Self {
        self.wave = Some(wave);
        self
    }

    pub fn is_claimed_by(&self, owner: &str) -> bool {
        self.status == TaskStatus::InProgress && self.claimed_by.as_deref() == Some(owner)
    }

    /// Evidence that counts toward resolution (warnings excluded).
    pub fn substantive_evidence(&self) -> usize {
        self.evidence.iter().filter(|r| !r.evidence.is_warning()).count()
    }

    /// Whether a role filter matches. Tasks without a role match any worker.
    pub fn role_matches(&self, requested: &str) -> bool {
        self.role.as_deref().is_none_or(|role| role == requested)
    }
}
