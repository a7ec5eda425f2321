// src/lock/mod.rs

//! Crash-tolerant, reentrant mutual exclusion over a resource path.
//!
//! A lock on resource `P` is the directory `P.lock`. Creating it is the
//! atomic test-and-set; the holder record inside (`holder.json`) names the
//! owner, its process id and the acquisition time.
//!
//! A holder whose process is gone, or whose lock is older than
//! `stale_after`, is broken and the lock is re-created for the new
//! requester. Breaking is serialized through a sibling `P.lock.reclaim`
//! directory so two waiters cannot both tear down the lock, and the holder
//! record is re-read under that guard before removal.

pub mod holder;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::{GridError, Result};
use crate::fs::FileSystem;
use crate::retry::RetryPolicy;

pub use holder::{HOLDER_FILE, LockHolder, pid_alive};

/// Consecutive immediate retries allowed after breaking a stale lock or
/// seeing a lock vanish, before falling back to the timeout check.
const MAX_IMMEDIATE_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Default acquisition timeout for [`LockManager::with_lock`].
    pub timeout: Duration,
    /// Age after which a held lock is considered abandoned.
    pub stale_after: Duration,
    pub retry: RetryPolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            stale_after: Duration::from_millis(60_000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Proof of a successful acquisition.
#[derive(Debug)]
#[must_use = "a lock handle should be released"]
pub struct LockHandle {
    resource: PathBuf,
    owner: String,
    /// The record this acquisition wrote; `None` for a reentrant handle.
    holder: Option<LockHolder>,
}

impl LockHandle {
    pub fn resource(&self) -> &Path {
        &self.resource
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// True when the owner already held the lock; releasing such a handle
    /// leaves the outer acquisition intact.
    pub fn is_reentrant(&self) -> bool {
        self.holder.is_none()
    }
}

/// What we found when looking inside an existing lock directory.
#[derive(Debug)]
enum HolderState {
    Missing,
    Held(LockHolder),
    /// The directory exists but its record cannot be read (the creator may
    /// be mid-write, or crashed before writing).
    Unreadable { age: Duration },
}

#[derive(Debug, Clone)]
pub struct LockManager {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    options: LockOptions,
}

/// `<resource>.lock`
pub fn lock_dir_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn reclaim_guard_for(lock_dir: &Path) -> PathBuf {
    let mut name = lock_dir.as_os_str().to_os_string();
    name.push(".reclaim");
    PathBuf::from(name)
}

impl LockManager {
    pub fn new(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>, options: LockOptions) -> Self {
        Self { fs, clock, options }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire the lock on `resource` for `owner`, waiting up to `timeout`.
    ///
    /// Fails with [`GridError::Contention`] when another live owner keeps
    /// the lock for the whole timeout.
    pub fn acquire(&self, resource: &Path, owner: &str, timeout: Duration) -> Result<LockHandle> {
        let lock_dir = lock_dir_for(resource);
        if let Some(parent) = lock_dir.parent() {
            if !parent.as_os_str().is_empty() {
                self.fs.create_dir_all(parent)?;
            }
        }

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut immediate: u32 = 0;

        loop {
            if self.fs.create_dir_exclusive(&lock_dir)? {
                let holder = self.write_holder(&lock_dir, owner)?;
                debug!(resource = ?resource, owner = %owner, attempts, "lock acquired");
                return Ok(LockHandle {
                    resource: resource.to_path_buf(),
                    owner: owner.to_string(),
                    holder: Some(holder),
                });
            }

            let mut retry_now = false;
            match self.inspect(&lock_dir)? {
                HolderState::Held(holder) if holder.owner == owner => {
                    debug!(resource = ?resource, owner = %owner, "lock re-entered by its owner");
                    return Ok(LockHandle {
                        resource: resource.to_path_buf(),
                        owner: owner.to_string(),
                        holder: None,
                    });
                }
                HolderState::Held(holder) => {
                    if let Some(reason) = self.staleness(&holder, self.options.stale_after) {
                        warn!(
                            resource = ?resource,
                            holder = %holder.owner,
                            pid = holder.pid,
                            reason,
                            "breaking stale lock"
                        );
                        retry_now = self.break_stale(&lock_dir, Some(&holder))?;
                    }
                }
                HolderState::Unreadable { age } if age > self.options.stale_after => {
                    warn!(resource = ?resource, age_ms = age.as_millis() as u64, "breaking lock with unreadable holder");
                    retry_now = self.break_stale(&lock_dir, None)?;
                }
                HolderState::Unreadable { .. } => {}
                HolderState::Missing => retry_now = true,
            }

            if retry_now && immediate < MAX_IMMEDIATE_RETRIES {
                immediate += 1;
                continue;
            }
            immediate = 0;

            attempts += 1;
            let elapsed = started.elapsed();
            if elapsed >= timeout || !self.options.retry.allows(attempts) {
                debug!(resource = ?resource, owner = %owner, attempts, "lock contended; giving up");
                return Err(GridError::Contention {
                    resource: resource.to_path_buf(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let delay = self.options.retry.next_delay(attempts).min(timeout - elapsed);
            thread::sleep(delay);
        }
    }

    /// Release the lock on `resource` held by `owner`.
    ///
    /// Returns `Ok(false)` if there was no lock. Releasing someone else's
    /// lock is rejected with [`GridError::Ownership`].
    pub fn release(&self, resource: &Path, owner: &str) -> Result<bool> {
        self.release_where(resource, owner, |holder| holder.owner == owner)
    }

    /// Release a handle. A reentrant handle is a no-op: the outer
    /// acquisition still owns the lock.
    ///
    /// If the lock was broken as stale and re-taken while the handle was
    /// held, the new holder's lock is left alone and
    /// [`GridError::Ownership`] is returned.
    pub fn release_handle(&self, handle: LockHandle) -> Result<()> {
        let Some(ours) = handle.holder else {
            return Ok(());
        };
        self.release_where(&handle.resource, &handle.owner, |holder| *holder == ours)
            .map(|_| ())
    }

    /// Remove the lock if its current holder passes `is_ours`. The holder is
    /// re-read under the reclaim guard, so a concurrent stale break cannot
    /// slip in between the check and the removal.
    fn release_where(
        &self,
        resource: &Path,
        owner: &str,
        is_ours: impl Fn(&LockHolder) -> bool,
    ) -> Result<bool> {
        let lock_dir = lock_dir_for(resource);
        if let HolderState::Missing = self.inspect(&lock_dir)? {
            return Ok(false);
        }

        self.under_guard(resource, &lock_dir, || match self.inspect(&lock_dir)? {
            HolderState::Missing => Ok(false),
            HolderState::Held(holder) if is_ours(&holder) => {
                self.fs.remove_dir_all(&lock_dir)?;
                debug!(resource = ?resource, owner = %owner, "lock released");
                Ok(true)
            }
            HolderState::Held(holder) => Err(GridError::Ownership(format!(
                "lock on {:?} is held by '{}' (since {}), not by this acquisition of '{}'",
                resource, holder.owner, holder.acquired_at, owner
            ))),
            HolderState::Unreadable { .. } => Err(GridError::Ownership(format!(
                "lock on {:?} has no readable holder; refusing release by '{}'",
                resource, owner
            ))),
        })
    }

    /// Run `f` while holding the reclaim guard of `lock_dir`, waiting up to
    /// the configured timeout for it.
    fn under_guard<T>(
        &self,
        resource: &Path,
        lock_dir: &Path,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let guard = reclaim_guard_for(lock_dir);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        while !self.fs.create_dir_exclusive(&guard)? {
            if self
                .dir_age(&guard)
                .is_some_and(|age| age > self.options.stale_after)
            {
                info!(guard = ?guard, "removing abandoned reclaim guard");
                self.fs.remove_dir_all(&guard)?;
                continue;
            }
            attempts += 1;
            let elapsed = started.elapsed();
            if elapsed >= self.options.timeout {
                return Err(GridError::Contention {
                    resource: resource.to_path_buf(),
                    timeout_ms: self.options.timeout.as_millis() as u64,
                });
            }
            let delay = self
                .options
                .retry
                .next_delay(attempts)
                .min(self.options.timeout - elapsed);
            thread::sleep(delay);
        }

        let outcome = f();
        if let Err(e) = self.fs.remove_dir_all(&guard) {
            warn!(guard = ?guard, error = %e, "failed to remove reclaim guard");
        }
        outcome
    }

    /// Run `f` inside the critical section for `resource`.
    ///
    /// The lock is released whether or not `f` succeeds.
    pub fn with_lock<T>(
        &self,
        resource: &Path,
        owner: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let handle = self.acquire(resource, owner, self.options.timeout)?;
        let result = f();
        let released = self.release_handle(handle);
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(resource = ?resource, error = %release_err, "lock release failed after error");
                Err(e)
            }
        }
    }

    /// Whether the lock on `resource` exists and is eligible for breaking.
    pub fn is_stale(&self, resource: &Path, stale_after: Duration) -> Result<bool> {
        let lock_dir = lock_dir_for(resource);
        Ok(match self.inspect(&lock_dir)? {
            HolderState::Missing => false,
            HolderState::Held(holder) => self.staleness(&holder, stale_after).is_some(),
            HolderState::Unreadable { age } => age > stale_after,
        })
    }

    /// Current holder of the lock on `resource`, if readable.
    pub fn holder(&self, resource: &Path) -> Result<Option<LockHolder>> {
        Ok(match self.inspect(&lock_dir_for(resource))? {
            HolderState::Held(holder) => Some(holder),
            _ => None,
        })
    }

    fn write_holder(&self, lock_dir: &Path, owner: &str) -> Result<LockHolder> {
        let holder = LockHolder::new(owner, self.clock.now());
        let written = serde_json::to_vec_pretty(&holder)
            .map_err(GridError::from)
            .and_then(|json| {
                self.fs
                    .write_atomic(&lock_dir.join(HOLDER_FILE), &json)
                    .map_err(GridError::from)
            });

        if let Err(e) = written {
            // Never leave an ownerless lock directory behind.
            if let Err(cleanup) = self.fs.remove_dir_all(lock_dir) {
                warn!(lock = ?lock_dir, error = %cleanup, "failed to clean up lock after holder write error");
            }
            return Err(e);
        }
        Ok(holder)
    }

    fn inspect(&self, lock_dir: &Path) -> Result<HolderState> {
        if !self.fs.is_dir(lock_dir) {
            return Ok(HolderState::Missing);
        }
        let holder_path = lock_dir.join(HOLDER_FILE);
        let parsed = self
            .fs
            .read_to_string(&holder_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LockHolder>(&raw).ok());

        match parsed {
            Some(holder) => Ok(HolderState::Held(holder)),
            None => match self.dir_age(lock_dir) {
                Some(age) => Ok(HolderState::Unreadable { age }),
                // Vanished between the two checks.
                None => Ok(HolderState::Missing),
            },
        }
    }

    fn staleness(&self, holder: &LockHolder, stale_after: Duration) -> Option<&'static str> {
        if !holder.is_alive() {
            return Some("holder process is gone");
        }
        if age_since(self.clock.now(), holder.acquired_at) > stale_after {
            return Some("lock exceeded staleness threshold");
        }
        None
    }

    fn dir_age(&self, path: &Path) -> Option<Duration> {
        let modified: DateTime<Utc> = self.fs.modified(path).ok()?.into();
        Some(age_since(self.clock.now(), modified))
    }

    /// Remove a stale lock if it still carries the holder we judged stale.
    ///
    /// Returns `true` when the lock directory is gone afterwards.
    fn break_stale(&self, lock_dir: &Path, observed: Option<&LockHolder>) -> Result<bool> {
        let guard = reclaim_guard_for(lock_dir);
        if !self.fs.create_dir_exclusive(&guard)? {
            // Someone else is breaking it. A guard left by a crashed breaker
            // expires like any other lock.
            if self
                .dir_age(&guard)
                .is_some_and(|age| age > self.options.stale_after)
            {
                info!(guard = ?guard, "removing abandoned reclaim guard");
                self.fs.remove_dir_all(&guard)?;
            }
            return Ok(false);
        }

        let outcome = (|| -> Result<bool> {
            let unchanged = match (self.inspect(lock_dir)?, observed) {
                (HolderState::Held(current), Some(expected)) => current == *expected,
                (HolderState::Unreadable { .. }, None) => true,
                (HolderState::Missing, _) => return Ok(true),
                _ => false,
            };
            if unchanged {
                self.fs.remove_dir_all(lock_dir)?;
            }
            Ok(unchanged)
        })();

        if let Err(e) = self.fs.remove_dir_all(&guard) {
            warn!(guard = ?guard, error = %e, "failed to remove reclaim guard");
        }
        outcome
    }
}

fn age_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}
