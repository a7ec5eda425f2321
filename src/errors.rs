// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Contention, blocked dependencies and lost claim races are steady-state
//! events; callers retry them. Ownership and not-found errors mean the
//! caller's view is stale. Cycle and corrupt-state errors are never
//! recovered automatically.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("lock on {resource:?} not obtained within {timeout_ms}ms")]
    Contention { resource: PathBuf, timeout_ms: u64 },

    #[error("ownership error: {0}")]
    Ownership(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("task '{task}' is blocked by unresolved dependencies: {pending:?}")]
    Blocked { task: String, pending: Vec<String> },

    #[error("task '{task}' is already claimed by '{owner}'")]
    AlreadyClaimed { task: String, owner: String },

    #[error("task '{task}' has role {task_role:?}, requested role '{requested}'")]
    RoleMismatch {
        task: String,
        task_role: Option<String>,
        requested: String,
    },

    #[error("cycle detected in task graph: {0}")]
    Cycle(String),

    #[error("corrupt state in {path:?}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GridError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        GridError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller should retry later (possibly against another task).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::Contention { .. } | GridError::Blocked { .. } | GridError::AlreadyClaimed { .. }
        )
    }

    /// Stable tag for machine consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            GridError::Contention { .. } => "contention",
            GridError::Ownership(_) => "ownership",
            GridError::NotFound { .. } => "not_found",
            GridError::Blocked { .. } => "blocked",
            GridError::AlreadyClaimed { .. } => "already_claimed",
            GridError::RoleMismatch { .. } => "role_mismatch",
            GridError::Cycle(_) => "cycle",
            GridError::CorruptState { .. } => "corrupt_state",
            GridError::InvalidTransition(_) => "invalid_transition",
            GridError::Validation(_) => "validation",
            GridError::ConfigError(_) => "config",
            GridError::IoError(_) => "io",
            GridError::TomlError(_) => "toml",
            GridError::JsonError(_) => "json",
            GridError::Other(_) => "other",
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, GridError>;
