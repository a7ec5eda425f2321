// src/lock/holder.rs

//! Holder metadata stored inside a lock directory, plus the process
//! liveness check used for crash recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the holder record inside `<resource>.lock/`.
pub const HOLDER_FILE: &str = "holder.json";

/// Who holds a lock, from which process, since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn new(owner: &str, acquired_at: DateTime<Utc>) -> Self {
        Self {
            owner: owner.to_string(),
            pid: std::process::id(),
            acquired_at,
        }
    }

    pub fn is_alive(&self) -> bool {
        pid_alive(self.pid)
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    // Without a liveness check, only the age threshold can expire a lock.
    true
}
