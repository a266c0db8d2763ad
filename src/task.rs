//! Registration of `svcguard monitor` as a boot-time OS task, so the monitor
//! itself survives crashes and reboots.
//!
//! - Windows: Task Scheduler (`schtasks`) with an XML definition carrying the
//!   restart-on-failure policy
//! - Linux: a tagged `@reboot` line in the invoking user's crontab

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::command::CommandRunner;
use crate::error::Result;

mod crontab;
mod schtasks;

pub use crontab::CrontabInstaller;
pub use schtasks::{SchtasksInstaller, parse_schtasks_status};

/// What to register: a task name and the command it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl TaskSpec {
    /// Task that runs this executable's `monitor` command against `config_path`.
    pub fn monitor_task(name: &str, service_name: &str, config_path: PathBuf) -> Result<Self> {
        let executable = std::env::current_exe()?;
        Ok(Self {
            name: name.to_string(),
            description: format!("svcguard health monitor for {service_name}"),
            executable,
            args: vec![
                "--config".to_string(),
                config_path.display().to_string(),
                "monitor".to_string(),
            ],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotInstalled,
    Ready,
    Running,
    Disabled,
    Other(String),
}

#[async_trait]
pub trait TaskInstaller: Send + Sync {
    /// Register (or replace) the task and start it.
    async fn install(&self) -> Result<()>;

    /// Remove the task. Removing a task that does not exist succeeds.
    async fn uninstall(&self) -> Result<()>;

    async fn task_exists(&self) -> Result<bool>;

    async fn task_status(&self) -> Result<TaskStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub exists: bool,
    pub status: TaskStatus,
}

/// Existence and status of the task, for the `verify` command.
pub async fn verify(name: &str, installer: &dyn TaskInstaller) -> Result<TaskReport> {
    let exists = installer.task_exists().await?;
    let status = if exists {
        installer.task_status().await?
    } else {
        TaskStatus::NotInstalled
    };
    Ok(TaskReport {
        name: name.to_string(),
        exists,
        status,
    })
}

/// Installer for this host's scheduler.
#[cfg(target_os = "windows")]
pub fn platform_installer(task: TaskSpec, runner: Arc<dyn CommandRunner>) -> Box<dyn TaskInstaller> {
    Box::new(SchtasksInstaller::new(task, runner))
}

/// Installer for this host's scheduler.
#[cfg(not(target_os = "windows"))]
pub fn platform_installer(task: TaskSpec, runner: Arc<dyn CommandRunner>) -> Box<dyn TaskInstaller> {
    Box::new(CrontabInstaller::new(task, runner))
}
