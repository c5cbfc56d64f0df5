//! Automation run state and the single-instance lock.
//!
//! The state file mirrors what the TUI status panel shows; the PID file
//! guarantees one live automation instance, reaping stale files left by
//! a dead process.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default automation state file.
pub const STATE_FILE: &str = ".automation-state.json";

/// Default PID lock file.
pub const PID_FILE: &str = ".automation.pid";

/// Persisted automation run state, ISO-8601 timestamps.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationState {
    /// Whether the loop is running.
    pub is_running: bool,
    /// Execution mode label.
    pub mode: String,
    /// When this run started.
    pub started_at: DateTime<Utc>,
    /// Last loop execution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_execution_time: Option<DateTime<Utc>>,
    /// Next scheduled execution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_execution_time: Option<DateTime<Utc>>,
    /// Owning process id.
    pub pid: u32,
}

impl AutomationState {
    /// A fresh running state for this process.
    pub fn started(mode: &str, now: DateTime<Utc>) -> Self {
        Self {
            is_running: true,
            mode: mode.to_string(),
            started_at: now,
            last_execution_time: None,
            next_execution_time: None,
            pid: std::process::id(),
        }
    }

    /// Write the state file.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read the state file.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Whether a PID refers to a live process.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

/// Single-instance lock held through a PID file.
///
/// The file holds the decimal PID, no trailing newline. A file naming a
/// dead PID is stale and reaped on acquire. The lock is released (file
/// removed) on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock, or fail with `AddrInUse` naming the live owner.
    pub fn acquire(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                if pid != std::process::id() && pid_alive(pid) {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("automation already running (pid {})", pid),
                    ));
                }
            }
            tracing::info!(path = %path.display(), "reaping stale pid file");
            std::fs::remove_file(&path)?;
        }

        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
