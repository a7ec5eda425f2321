// src/types.rs

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{GridError, Result};

/// Canonical task identifier type.
pub type TaskId = String;

/// Identity of a worker, planner or any other actor.
pub type ActorId = String;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("static id pattern is valid")
});

/// Reject identifiers that are empty, too long, or could escape their
/// directory when used as a file name.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if !ID_PATTERN.is_match(id) || id.contains("..") {
        return Err(GridError::Validation(format!(
            "invalid {kind} id '{id}' (expected [A-Za-z0-9][A-Za-z0-9._-]*, max 128 chars)"
        )));
    }
    Ok(())
}

/// Team-wide lifecycle phase, stored in `team.json`.
///
/// - `Planning`: tasks may be deleted and waves recomputed.
/// - `Executing`: wave membership is frozen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Planning,
    Executing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Executing => write!(f, "executing"),
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planning" => Ok(Phase::Planning),
            "executing" => Ok(Phase::Executing),
            other => Err(format!(
                "invalid phase: {other} (expected \"planning\" or \"executing\")"
            )),
        }
    }
}
