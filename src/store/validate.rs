// src/store/validate.rs

//! Invariants checked on every locked read-modify-write of a task.

use crate::errors::{GridError, Result};
use crate::store::task::{Task, TaskStatus};

/// Validate that `next` is a legal successor of `prev`.
pub fn validate_update(prev: &Task, next: &Task) -> Result<()> {
    ensure_immutable_fields(prev, next)?;
    ensure_evidence_append_only(prev, next)?;
    ensure_status_transition(prev, next)?;
    validate_claim_fields(next)?;
    Ok(())
}

fn ensure_immutable_fields(prev: &Task, next: &Task) -> Result<()> {
    if prev.id != next.id {
        return Err(GridError::Validation(format!(
            "task id is immutable ('{}' -> '{}')",
            prev.id, next.id
        )));
    }
    if prev.role != next.role {
        return Err(GridError::Validation(format!(
            "task '{}': role is immutable",
            prev.id
        )));
    }
    if prev.blocked_by != next.blocked_by {
        return Err(GridError::Validation(format!(
            "task '{}': blocked_by is immutable",
            prev.id
        )));
    }
    if prev.created_at != next.created_at {
        return Err(GridError::Validation(format!(
            "task '{}': created_at is immutable",
            prev.id
        )));
    }
    if prev.status != TaskStatus::Open
        && (prev.title != next.title || prev.description != next.description)
    {
        return Err(GridError::Validation(format!(
            "task '{}': title and description can only change while open",
            prev.id
        )));
    }
    Ok(())
}

fn ensure_evidence_append_only(prev: &Task, next: &Task) -> Result<()> {
    if next.evidence.len() < prev.evidence.len() || !next.evidence.starts_with(&prev.evidence) {
        return Err(GridError::Validation(format!(
            "task '{}': evidence is append-only",
            prev.id
        )));
    }
    Ok(())
}

fn ensure_status_transition(prev: &Task, next: &Task) -> Result<()> {
    if !prev.status.can_transition_to(next.status) {
        return Err(GridError::InvalidTransition(format!(
            "task '{}': {} -> {}",
            prev.id, prev.status, next.status
        )));
    }
    Ok(())
}

/// `claimed_by` / `claimed_at` are set exactly when the task is in progress.
pub fn validate_claim_fields(task: &Task) -> Result<()> {
    let claimed = task.claimed_by.is_some() && task.claimed_at.is_some();
    let unclaimed = task.claimed_by.is_none() && task.claimed_at.is_none();
    let consistent = match task.status {
        TaskStatus::InProgress => claimed,
        TaskStatus::Open | TaskStatus::Resolved => unclaimed,
    };
    if !consistent {
        return Err(GridError::Validation(format!(
            "task '{}': claim fields inconsistent with status {}",
            task.id, task.status
        )));
    }
    Ok(())
}
