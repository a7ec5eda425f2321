// src/claim/mod.rs

//! Claim protocol: the state machine over task status, built on the
//! locked update path of [`TaskStore`].
//!
//! Every check made while listing candidates is repeated inside the
//! critical section, because another worker may win the task between the
//! listing and the lock.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::{GridError, Result};
use crate::store::{Evidence, EvidenceRecord, Task, TaskFilter, TaskStatus, TaskStore};

/// Claim-time policy, from the `[claim]` config section.
#[derive(Debug, Clone)]
pub struct ClaimPolicy {
    /// Treat every role filter as strict.
    pub strict_roles: bool,
    /// Reject resolution without substantive evidence.
    pub require_evidence: bool,
    /// Candidates tried by [`ClaimProtocol::claim_next`] before giving up.
    pub max_candidates: u32,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            strict_roles: false,
            require_evidence: true,
            max_candidates: 16,
        }
    }
}

pub struct ClaimProtocol<'a> {
    store: &'a TaskStore,
    policy: ClaimPolicy,
}

impl<'a> ClaimProtocol<'a> {
    pub fn new(store: &'a TaskStore, policy: ClaimPolicy) -> Self {
        Self { store, policy }
    }

    /// Claim a specific task when `id` is given, otherwise the next ready
    /// candidate. `Ok(None)` means nothing was claimable.
    pub fn claim(
        &self,
        id: Option<&str>,
        owner: &str,
        role: Option<&str>,
        strict: bool,
    ) -> Result<Option<Task>> {
        match id {
            Some(id) => self.claim_task(id, owner, role, strict).map(Some),
            None => self.claim_next(owner, role, strict),
        }
    }

    /// Claim exactly `id` for `owner`.
    ///
    /// Errors: `NotFound`, `Blocked`, `AlreadyClaimed`, `RoleMismatch`
    /// (strict only), `InvalidTransition` for resolved tasks, `Contention`
    /// if the task lock stays busy.
    pub fn claim_task(
        &self,
        id: &str,
        owner: &str,
        role: Option<&str>,
        strict: bool,
    ) -> Result<Task> {
        let task = self.store.get(id)?;
        if let Some(done) = precheck_status(&task, owner)? {
            return Ok(done);
        }

        let pending = self.store.pending_dependencies(&task)?;
        if !pending.is_empty() {
            return Err(GridError::Blocked {
                task: id.to_string(),
                pending,
            });
        }

        let strict = strict || self.policy.strict_roles;
        let mismatch = role.filter(|r| !task.role_matches(r));
        if let Some(requested) = mismatch {
            if strict {
                return Err(GridError::RoleMismatch {
                    task: id.to_string(),
                    task_role: task.role.clone(),
                    requested: requested.to_string(),
                });
            }
        }

        let claimed = self.store.update(id, owner, |t| {
            // Re-verify under the lock: the listing above may be stale.
            if precheck_status(t, owner)?.is_some() {
                return Ok(());
            }
            let now = self.store.clock().now();
            t.status = TaskStatus::InProgress;
            t.claimed_by = Some(owner.to_string());
            t.claimed_at = Some(now);
            if let Some(requested) = mismatch {
                t.evidence.push(EvidenceRecord {
                    recorded_by: owner.to_string(),
                    recorded_at: now,
                    evidence: Evidence::Warning {
                        message: format!(
                            "role mismatch: task role {:?}, claimed as '{}'",
                            t.role, requested
                        ),
                    },
                });
            }
            Ok(())
        })?;

        if mismatch.is_some() {
            warn!(task = %id, owner = %owner, role = ?claimed.role, "claimed despite role mismatch");
        }
        info!(task = %id, owner = %owner, "task claimed");
        Ok(claimed)
    }

    /// Walk ready tasks in `(wave, id)` order, tasks matching `role` first,
    /// and claim the first one this owner wins.
    pub fn claim_next(&self, owner: &str, role: Option<&str>, strict: bool) -> Result<Option<Task>> {
        let strict = strict || self.policy.strict_roles;
        let mut candidates = self.store.list(&TaskFilter::ready())?;
        if let Some(role) = role {
            if strict {
                candidates.retain(|t| t.role_matches(role));
            } else {
                // Stable: keeps (wave, id) order within each group.
                candidates.sort_by_key(|t| !t.role_matches(role));
            }
        }

        self.claim_first(&candidates, owner, role, strict)
    }

    /// Try `candidates` in order. A candidate that was claimed, resolved or
    /// deleted since it was listed is skipped.
    fn claim_first(
        &self,
        candidates: &[Task],
        owner: &str,
        role: Option<&str>,
        strict: bool,
    ) -> Result<Option<Task>> {
        for (attempt, candidate) in candidates
            .iter()
            .take(self.policy.max_candidates as usize)
            .enumerate()
        {
            match self.claim_task(&candidate.id, owner, role, strict) {
                Ok(task) => return Ok(Some(task)),
                Err(e) if lost_race(&e) => {
                    debug!(
                        task = %candidate.id,
                        owner = %owner,
                        attempt = attempt + 1,
                        reason = e.kind(),
                        "candidate lost; trying next"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Give a claimed task back. Evidence is kept.
    pub fn release(&self, id: &str, owner: &str) -> Result<Task> {
        let released = self.store.update(id, owner, |t| match t.status {
            TaskStatus::Open => Ok(()),
            TaskStatus::Resolved => Err(GridError::InvalidTransition(format!(
                "task '{}' is resolved and cannot be released",
                t.id
            ))),
            TaskStatus::InProgress if t.claimed_by.as_deref() == Some(owner) => {
                reopen(t);
                Ok(())
            }
            TaskStatus::InProgress => Err(GridError::Ownership(format!(
                "task '{}' is claimed by {:?}, not '{}'",
                t.id, t.claimed_by, owner
            ))),
        })?;
        info!(task = %id, owner = %owner, "task released");
        Ok(released)
    }

    /// Administrative release of a claim that is still the one observed by
    /// the caller (`claimant` at `claimed_at`).
    ///
    /// Returns `Ok(None)` when the claim changed in the meantime: already
    /// released, resolved, or re-claimed.
    pub fn release_claim(
        &self,
        id: &str,
        actor: &str,
        claimant: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut released = false;
        let task = self.store.update(id, actor, |t| {
            if t.status == TaskStatus::InProgress
                && t.claimed_by.as_deref() == Some(claimant)
                && t.claimed_at == Some(claimed_at)
            {
                reopen(t);
                released = true;
            }
            Ok(())
        })?;
        Ok(released.then_some(task))
    }

    /// Mark a claimed task resolved, optionally attaching one last piece of
    /// evidence in the same update.
    pub fn resolve(&self, id: &str, owner: &str, evidence: Option<Evidence>) -> Result<Task> {
        let require_evidence = self.policy.require_evidence;
        let resolved = self.store.update(id, owner, |t| {
            if !t.is_claimed_by(owner) {
                return Err(GridError::Ownership(format!(
                    "task '{}' is {} (claimed by {:?}); '{}' cannot resolve it",
                    t.id, t.status, t.claimed_by, owner
                )));
            }
            let now = self.store.clock().now();
            if let Some(evidence) = evidence {
                t.evidence.push(EvidenceRecord {
                    recorded_by: owner.to_string(),
                    recorded_at: now,
                    evidence,
                });
            }
            if require_evidence && t.substantive_evidence() == 0 {
                return Err(GridError::Validation(format!(
                    "task '{}' has no evidence; attach some before resolving",
                    t.id
                )));
            }
            t.status = TaskStatus::Resolved;
            t.claimed_by = None;
            t.claimed_at = None;
            t.completed_at = Some(now);
            Ok(())
        })?;
        info!(task = %id, owner = %owner, evidence = resolved.evidence.len(), "task resolved");
        Ok(resolved)
    }

    /// Append evidence to a task claimed by `owner`.
    pub fn append_evidence(&self, id: &str, owner: &str, evidence: Evidence) -> Result<Task> {
        self.store.update(id, owner, |t| {
            if !t.is_claimed_by(owner) {
                return Err(GridError::Ownership(format!(
                    "task '{}' is not claimed by '{}'",
                    t.id, owner
                )));
            }
            t.evidence.push(EvidenceRecord {
                recorded_by: owner.to_string(),
                recorded_at: self.store.clock().now(),
                evidence,
            });
            Ok(())
        })
    }
}

/// Status checks shared by the pre-lock and in-lock paths.
///
/// `Ok(Some(task))` means `owner` already holds the claim.
fn precheck_status(task: &Task, owner: &str) -> Result<Option<Task>> {
    match task.status {
        TaskStatus::Open => Ok(None),
        TaskStatus::InProgress if task.claimed_by.as_deref() == Some(owner) => {
            Ok(Some(task.clone()))
        }
        TaskStatus::InProgress => Err(GridError::AlreadyClaimed {
            task: task.id.clone(),
            owner: task.claimed_by.clone().unwrap_or_default(),
        }),
        TaskStatus::Resolved => Err(GridError::InvalidTransition(format!(
            "task '{}' is already resolved",
            task.id
        ))),
    }
}

/// Outcomes that mean another worker got to a listed candidate first.
fn lost_race(err: &GridError) -> bool {
    err.is_retryable()
        || matches!(
            err,
            GridError::NotFound { kind: "task", .. } | GridError::InvalidTransition(_)
        )
}

fn reopen(task: &mut Task) {
    task.status = TaskStatus::Open;
    task.claimed_by = None;
    task.claimed_at = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::{Clock, SystemClock};
    use crate::fs::mock::MockFileSystem;
    use crate::layout::TeamLayout;
    use crate::lock::{LockManager, LockOptions};

    fn store() -> TaskStore {
        let fs = MockFileSystem::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let layout = TeamLayout::new("/grid", "acme", "core").unwrap();
        let locks = LockManager::new(Arc::new(fs.clone()), clock.clone(), LockOptions::default());
        let store = TaskStore::new(Arc::new(fs), layout, locks, clock);
        store.init_team("lead").unwrap();
        store.create(Task::new("T1", "schema").with_role("backend"), "planner").unwrap();
        store
            .create(Task::new("T2", "api").blocked_by(["T1"]), "planner")
            .unwrap();
        store
    }

    fn note(text: &str) -> Evidence {
        Evidence::Note { text: text.into() }
    }

    #[test]
    fn blocked_until_dependency_resolves() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let err = claims.claim_task("T2", "w1", None, false).unwrap_err();
        assert!(matches!(&err, GridError::Blocked { pending, .. } if pending == &vec!["T1".to_string()]));

        claims.claim_task("T1", "w1", None, false).unwrap();
        claims.resolve("T1", "w1", Some(note("migrated"))).unwrap();

        let t2 = claims.claim_task("T2", "w2", None, false).unwrap();
        assert_eq!(t2.claimed_by.as_deref(), Some("w2"));
        assert_eq!(t2.status, TaskStatus::InProgress);
    }

    #[test]
    fn second_claimant_is_rejected() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        claims.claim_task("T1", "a", None, false).unwrap();
        let err = claims.claim_task("T1", "b", None, false).unwrap_err();
        assert!(matches!(err, GridError::AlreadyClaimed { ref owner, .. } if owner == "a"));

        // Same owner again is idempotent.
        let again = claims.claim_task("T1", "a", None, false).unwrap();
        assert_eq!(again.claimed_by.as_deref(), Some("a"));
    }

    #[test]
    fn strict_role_mismatch_is_rejected() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let err = claims
            .claim_task("T1", "w", Some("frontend"), true)
            .unwrap_err();
        assert!(matches!(err, GridError::RoleMismatch { .. }));
        assert_eq!(store.get("T1").unwrap().status, TaskStatus::Open);
    }

    #[test]
    fn lenient_role_mismatch_records_warning() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let task = claims
            .claim_task("T1", "w", Some("frontend"), false)
            .unwrap();
        assert_eq!(task.evidence.len(), 1);
        assert!(task.evidence[0].evidence.is_warning());

        // A warning alone does not satisfy the evidence requirement.
        let err = claims.resolve("T1", "w", None).unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
    }

    #[test]
    fn claim_next_skips_blocked_and_prefers_role() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let first = claims.claim_next("w1", Some("backend"), true).unwrap().unwrap();
        assert_eq!(first.id, "T1");
        // T2 is blocked, T1 is taken.
        assert!(claims.claim_next("w2", None, false).unwrap().is_none());
    }

    #[test]
    fn candidates_lost_after_listing_are_skipped() {
        let store = store();
        store.create(Task::new("T3", "docs"), "planner").unwrap();
        store.create(Task::new("T4", "ci"), "planner").unwrap();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let listed = store.list(&TaskFilter::ready()).unwrap();
        let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T3", "T4"]);

        // Between the listing and the claim: T1 is finished by someone
        // else and T3 is deleted.
        claims.claim_task("T1", "w2", None, false).unwrap();
        claims.resolve("T1", "w2", Some(note("done"))).unwrap();
        store.delete("T3", "planner").unwrap();

        let won = claims.claim_first(&listed, "w1", None, false).unwrap().unwrap();
        assert_eq!(won.id, "T4");
        assert_eq!(won.claimed_by.as_deref(), Some("w1"));
    }

    #[test]
    fn release_requires_claimant_and_keeps_evidence() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        claims.claim_task("T1", "w1", None, false).unwrap();
        claims.append_evidence("T1", "w1", note("half done")).unwrap();

        let err = claims.release("T1", "w2").unwrap_err();
        assert!(matches!(err, GridError::Ownership(_)));

        let released = claims.release("T1", "w1").unwrap();
        assert_eq!(released.status, TaskStatus::Open);
        assert!(released.claimed_by.is_none());
        assert!(released.claimed_at.is_none());
        assert_eq!(released.evidence.len(), 1);
    }

    #[test]
    fn resolve_requires_ownership() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let err = claims.resolve("T1", "w1", Some(note("x"))).unwrap_err();
        assert!(matches!(err, GridError::Ownership(_)));

        claims.claim_task("T1", "w1", None, false).unwrap();
        let err = claims.resolve("T1", "w2", Some(note("x"))).unwrap_err();
        assert!(matches!(err, GridError::Ownership(_)));

        let done = claims.resolve("T1", "w1", Some(note("x"))).unwrap();
        assert_eq!(done.status, TaskStatus::Resolved);
        assert!(done.completed_at.is_some());
        assert!(done.claimed_by.is_none());
    }

    #[test]
    fn resolve_without_evidence_allowed_when_policy_off() {
        let store = store();
        let policy = ClaimPolicy {
            require_evidence: false,
            ..ClaimPolicy::default()
        };
        let claims = ClaimProtocol::new(&store, policy);
        claims.claim_task("T1", "w1", None, false).unwrap();
        assert_eq!(
            claims.resolve("T1", "w1", None).unwrap().status,
            TaskStatus::Resolved
        );
    }

    #[test]
    fn release_claim_ignores_changed_claims() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());

        let t = claims.claim_task("T1", "w1", None, false).unwrap();
        let claimed_at = t.claimed_at.unwrap();

        assert!(
            claims
                .release_claim("T1", "reaper", "someone-else", claimed_at)
                .unwrap()
                .is_none()
        );
        let released = claims
            .release_claim("T1", "reaper", "w1", claimed_at)
            .unwrap()
            .unwrap();
        assert_eq!(released.status, TaskStatus::Open);
        assert!(
            claims
                .release_claim("T1", "reaper", "w1", claimed_at)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn claiming_unknown_task_is_not_found() {
        let store = store();
        let claims = ClaimProtocol::new(&store, ClaimPolicy::default());
        assert!(matches!(
            claims.claim_task("T404", "w", None, false),
            Err(GridError::NotFound { .. })
        ));
    }
}
