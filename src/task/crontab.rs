//! `@reboot` crontab entry for hosts without Task Scheduler.
//!
//! The entry is found again by a trailing `# svcguard:<name>` marker, so the
//! rest of the user's crontab is left untouched.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use super::{TaskInstaller, TaskSpec, TaskStatus};
use crate::command::CommandRunner;
use crate::error::{MonitorError, Result};

pub struct CrontabInstaller {
    task: TaskSpec,
    runner: Arc<dyn CommandRunner>,
}

/// Single-quote for `/bin/sh`.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

impl CrontabInstaller {
    pub fn new(task: TaskSpec, runner: Arc<dyn CommandRunner>) -> Self {
        Self { task, runner }
    }

    fn marker(&self) -> String {
        format!("# svcguard:{}", self.task.name)
    }

    fn is_ours(&self, line: &str) -> bool {
        line.trim_end().ends_with(&self.marker())
    }

    pub fn entry(&self) -> String {
        let mut command = shell_quote(&self.task.executable.display().to_string());
        for arg in &self.task.args {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }
        format!("@reboot {command} >/dev/null 2>&1 {}", self.marker())
    }

    async fn read_crontab(&self) -> Result<String> {
        let output = self.runner.run("crontab", &["-l"]).await?;
        if output.success {
            return Ok(output.stdout);
        }
        // An empty crontab is reported as a failure.
        if output.combined().contains("no crontab for") {
            return Ok(String::new());
        }
        Err(MonitorError::Command {
            program: "crontab -l".to_string(),
            message: output.combined().trim().to_string(),
        })
    }

    async fn write_crontab(&self, lines: &[String]) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("svcguard-crontab-")
            .tempfile()?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()?;

        let path = file.path().display().to_string();
        self.runner
            .run("crontab", &[&path])
            .await?
            .into_checked("crontab")?;
        Ok(())
    }

    fn foreign_lines(&self, current: &str) -> Vec<String> {
        current
            .lines()
            .filter(|line| !self.is_ours(line))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl TaskInstaller for CrontabInstaller {
    async fn install(&self) -> Result<()> {
        let current = self.read_crontab().await?;
        let mut lines = self.foreign_lines(&current);
        lines.push(self.entry());
        self.write_crontab(&lines).await?;
        log::info!(
            "Registered @reboot crontab entry {} (takes effect on next boot)",
            self.task.name
        );
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        let current = self.read_crontab().await?;
        if !current.lines().any(|line| self.is_ours(line)) {
            log::info!("Crontab entry {} is not installed", self.task.name);
            return Ok(());
        }
        self.write_crontab(&self.foreign_lines(&current)).await?;
        log::info!("Removed crontab entry {}", self.task.name);
        Ok(())
    }

    async fn task_exists(&self) -> Result<bool> {
        let current = self.read_crontab().await?;
        Ok(current.lines().any(|line| self.is_ours(line)))
    }

    async fn task_status(&self) -> Result<TaskStatus> {
        if self.task_exists().await? {
            Ok(TaskStatus::Ready)
        } else {
            Ok(TaskStatus::NotInstalled)
        }
    }
}
