// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::claim::ClaimPolicy;
use crate::lock::LockOptions;
use crate::retry::RetryPolicy;

/// Configuration as read from `taskgrid.toml`, before validation.
///
/// ```toml
/// [lock]
/// timeout_ms = 5000
/// stale_after_ms = 60000
///
/// [claim]
/// strict_roles = false
/// require_evidence = true
///
/// [reclaim]
/// stale_after_ms = 3600000
/// interval_ms = 60000
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub claim: ClaimSection,
    #[serde(default)]
    pub reclaim: ReclaimSection,
}

/// Validated configuration. Build one through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub lock: LockSection,
    pub claim: ClaimSection,
    pub reclaim: ReclaimSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            lock: raw.lock,
            claim: raw.claim,
            reclaim: raw.reclaim,
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.lock.timeout_ms),
            stale_after: Duration::from_millis(self.lock.stale_after_ms),
            retry: RetryPolicy::new(
                Duration::from_millis(self.lock.retry_base_ms),
                Duration::from_millis(self.lock.retry_max_ms),
            ),
        }
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            strict_roles: self.claim.strict_roles,
            require_evidence: self.claim.require_evidence,
            max_candidates: self.claim.max_candidates,
        }
    }

    pub fn reclaim_stale_after(&self) -> Duration {
        Duration::from_millis(self.reclaim.stale_after_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim.interval_ms)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[lock]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockSection {
    /// How long `acquire` retries before reporting contention.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Age after which a held lock is broken even if its process lives.
    #[serde(default = "default_lock_stale_after_ms")]
    pub stale_after_ms: u64,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_stale_after_ms() -> u64 {
    60_000
}

fn default_retry_base_ms() -> u64 {
    20
}

fn default_retry_max_ms() -> u64 {
    500
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            stale_after_ms: default_lock_stale_after_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

/// `[claim]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimSection {
    /// Treat every `--role` as strict.
    #[serde(default)]
    pub strict_roles: bool,

    /// Reject `resolve` on tasks without non-warning evidence.
    #[serde(default = "default_true")]
    pub require_evidence: bool,

    /// Candidates tried by a claim without `--id`.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_candidates() -> u32 {
    16
}

impl Default for ClaimSection {
    fn default() -> Self {
        Self {
            strict_roles: false,
            require_evidence: true,
            max_candidates: default_max_candidates(),
        }
    }
}

/// `[reclaim]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReclaimSection {
    /// Claim age that makes a task reclaimable; `0` disables reclaiming.
    #[serde(default = "default_reclaim_stale_after_ms")]
    pub stale_after_ms: u64,

    /// Pause between monitor sweeps.
    #[serde(default = "default_reclaim_interval_ms")]
    pub interval_ms: u64,
}

fn default_reclaim_stale_after_ms() -> u64 {
    3_600_000
}

fn default_reclaim_interval_ms() -> u64 {
    60_000
}

impl Default for ReclaimSection {
    fn default() -> Self {
        Self {
            stale_after_ms: default_reclaim_stale_after_ms(),
            interval_ms: default_reclaim_interval_ms(),
        }
    }
}
