use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Log file for the start/stop/restart/status commands.
pub const SERVICE_LOG_FILE: &str = "hybrid-service.log";
/// Log file for the monitor loop and one-shot checks.
pub const MONITOR_LOG_FILE: &str = "health-monitor.log";

/// Top‑level supervisor configuration. Every field has a default, so a partial
/// TOML file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name registered with the OS service manager.
    pub service_name: String,
    /// Port the application listens on.
    pub port: u16,
    /// Endpoint polled by the monitor loop.
    pub health_path: String,
    /// Unauthenticated endpoint used while verifying a restart.
    pub public_health_path: String,
    pub check_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub max_consecutive_failures: u32,
    pub restart_cooldown_secs: u64,
    /// Minimum gap between routine "still healthy" log lines.
    pub healthy_log_interval_secs: u64,
    pub stop_attempts: u32,
    pub start_attempts: u32,
    pub poll_interval_ms: u64,
    /// Pause between a confirmed stop and the next start.
    pub settle_delay_ms: u64,
    pub log_dir: PathBuf,
    pub pid_file: PathBuf,
    /// Scheduled task that keeps `svcguard monitor` alive across reboots.
    pub task_name: String,
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("C:\\ProgramData"));

    #[cfg(not(target_os = "windows"))]
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
    });

    base.join("svcguard")
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            service_name: "ElectricityTokensTracker".into(),
            port: 3000,
            health_path: "/api/health".into(),
            public_health_path: "/api/health/public".into(),
            check_interval_secs: 30,
            http_timeout_secs: 10,
            max_consecutive_failures: 3,
            restart_cooldown_secs: 300,
            healthy_log_interval_secs: 300,
            stop_attempts: 30,
            start_attempts: 60,
            poll_interval_ms: 1000,
            settle_delay_ms: 2000,
            log_dir: data.join("logs"),
            pid_file: data.join("service.pid"),
            task_name: "ElectricityTokensHealthMonitor".into(),
        }
    }
}

impl MonitorConfig {
    /// `<config dir>/svcguard/svcguard.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("svcguard");
        Ok(config_dir.join("svcguard.toml"))
    }

    /// Write the default config to `path` unless a file is already there.
    ///
    /// Returns whether a file was created. Runs before logging is set up, so
    /// reporting the creation is left to the caller.
    pub fn create_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let default_toml = toml::to_string_pretty(&MonitorConfig::default())
            .context("Failed to serialize default config")?;
        fs::write(path, default_toml).context("Failed to write config file")?;
        Ok(true)
    }

    /// Read, parse and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg: MonitorConfig = toml::from_str(&cfg_str)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load the config at `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        Self::create_default(path)?;
        Self::load(path)
    }

    /// Reject values that would make the loops spin or never fire.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: &str| Err(MonitorError::Config(msg.to_string()));

        if self.service_name.trim().is_empty() {
            return invalid("service_name must not be empty");
        }
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        if !self.health_path.starts_with('/') || !self.public_health_path.starts_with('/') {
            return invalid("health paths must start with '/'");
        }
        if self.check_interval_secs == 0 || self.http_timeout_secs == 0 || self.poll_interval_ms == 0
        {
            return invalid("intervals and timeouts must be non-zero");
        }
        if self.max_consecutive_failures == 0 {
            return invalid("max_consecutive_failures must be at least 1");
        }
        if self.stop_attempts == 0 || self.start_attempts == 0 {
            return invalid("stop_attempts and start_attempts must be at least 1");
        }
        if self.task_name.trim().is_empty() {
            return invalid("task_name must not be empty");
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    pub fn healthy_log_interval(&self) -> Duration {
        Duration::from_secs(self.healthy_log_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn log_path(&self, file_name: &str) -> PathBuf {
        self.log_dir.join(file_name)
    }
}
