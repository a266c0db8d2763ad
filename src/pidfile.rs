//! Best-effort record of the supervised application's PID.
//!
//! The monitor never owns a process handle for the service, so this file is the
//! only memory of "which process did we last see" across CLI invocations.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Backoff schedule for removing a file that another process still holds open.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
    /// Still locked after every retry; renamed aside so the next write starts clean.
    Deferred(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
    retry: RetryPolicy,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `pid` atomically (temp file + rename).
    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            write!(file, "{pid}")?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| MonitorError::Parse {
                what: "pid file",
                detail: format!("{}: {e}", self.path.display()),
            })
    }

    pub async fn remove(&self) -> Result<RemoveOutcome> {
        self.remove_with(|p| fs::remove_file(p)).await
    }

    async fn remove_with<F>(&self, mut remove: F) -> Result<RemoveOutcome>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=self.retry.max_attempts {
            match remove(&self.path) {
                Ok(()) => return Ok(RemoveOutcome::Removed),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RemoveOutcome::Absent),
                Err(e) if is_lock_error(&e) => {
                    log::warn!(
                        "PID file {} is locked (attempt {attempt}/{}): {e}",
                        self.path.display(),
                        self.retry.max_attempts
                    );
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let aside = self.deferred_path();
        fs::rename(&self.path, &aside)?;
        log::warn!(
            "PID file still locked, renamed to {} for later deletion",
            aside.display()
        );
        Ok(RemoveOutcome::Deferred(aside))
    }

    fn deferred_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "service.pid".to_string());
        self.path.with_file_name(format!("{name}.delete-{stamp}"))
    }
}

/// EBUSY / EACCES, or the Windows sharing-violation equivalents.
fn is_lock_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    )
}
