//! Windows Task Scheduler registration via `schtasks`.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use super::{TaskInstaller, TaskSpec, TaskStatus};
use crate::command::{CommandOutput, CommandRunner};
use crate::error::{MonitorError, Result};

pub struct SchtasksInstaller {
    task: TaskSpec,
    runner: Arc<dyn CommandRunner>,
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Quote an argument for the task's command line.
fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', '\t', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Parse the `Status:` line of `schtasks /query /fo LIST`.
pub fn parse_schtasks_status(output: &str) -> TaskStatus {
    let Some(value) = output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "Status").then(|| value.trim())
    }) else {
        return TaskStatus::Other("unknown".to_string());
    };

    match value {
        "Ready" => TaskStatus::Ready,
        "Running" => TaskStatus::Running,
        "Disabled" => TaskStatus::Disabled,
        other => TaskStatus::Other(other.to_string()),
    }
}

fn reports_missing_task(output: &CommandOutput) -> bool {
    let text = output.combined().to_ascii_lowercase();
    text.contains("cannot find") || text.contains("does not exist")
}

impl SchtasksInstaller {
    pub fn new(task: TaskSpec, runner: Arc<dyn CommandRunner>) -> Self {
        Self { task, runner }
    }

    /// Task definition: boot + logon triggers, SYSTEM principal, single
    /// instance, no time limit, restart every minute on failure.
    pub fn task_xml(&self) -> String {
        let arguments = self
            .task
            .args
            .iter()
            .map(|a| quote_arg(a))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            r#"<?xml version="1.0" encoding="UTF-16"?>
<Task version="1.2" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <RegistrationInfo>
    <Description>{description}</Description>
  </RegistrationInfo>
  <Triggers>
    <BootTrigger>
      <Enabled>true</Enabled>
      <Delay>PT1M</Delay>
    </BootTrigger>
    <LogonTrigger>
      <Enabled>true</Enabled>
    </LogonTrigger>
  </Triggers>
  <Principals>
    <Principal id="Author">
      <UserId>S-1-5-18</UserId>
      <RunLevel>HighestAvailable</RunLevel>
    </Principal>
  </Principals>
  <Settings>
    <MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy>
    <DisallowStartIfOnBatteries>false</DisallowStartIfOnBatteries>
    <StopIfGoingOnBatteries>false</StopIfGoingOnBatteries>
    <StartWhenAvailable>true</StartWhenAvailable>
    <ExecutionTimeLimit>PT0S</ExecutionTimeLimit>
    <RestartOnFailure>
      <Interval>PT1M</Interval>
      <Count>999</Count>
    </RestartOnFailure>
    <Enabled>true</Enabled>
  </Settings>
  <Actions Context="Author">
    <Exec>
      <Command>{command}</Command>
      <Arguments>{arguments}</Arguments>
    </Exec>
  </Actions>
</Task>
"#,
            description = xml_escape(&self.task.description),
            command = xml_escape(&self.task.executable.display().to_string()),
            arguments = xml_escape(&arguments),
        )
    }

    /// Task Scheduler expects the XML as UTF-16 with a byte-order mark.
    fn write_xml(&self) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("svcguard-task-")
            .suffix(".xml")
            .tempfile()?;
        let mut bytes = vec![0xFF, 0xFE];
        for unit in self.task_xml().encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    }

    async fn schtasks(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run("schtasks", args).await
    }
}

#[async_trait]
impl TaskInstaller for SchtasksInstaller {
    async fn install(&self) -> Result<()> {
        let xml = self.write_xml()?;
        let xml_path = xml.path().display().to_string();

        self.schtasks(&["/create", "/tn", &self.task.name, "/xml", &xml_path, "/f"])
            .await?
            .into_checked("schtasks /create")?;
        log::info!("Registered scheduled task {}", self.task.name);

        match self.schtasks(&["/run", "/tn", &self.task.name]).await {
            Ok(out) if out.success => log::info!("Started scheduled task {}", self.task.name),
            Ok(out) => log::warn!(
                "Task {} registered but could not be started now: {}",
                self.task.name,
                out.combined().trim()
            ),
            Err(e) => log::warn!("Task {} registered but not started: {e}", self.task.name),
        }
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        if !self.task_exists().await? {
            log::info!("Scheduled task {} is not installed", self.task.name);
            return Ok(());
        }

        // A running monitor would otherwise keep going until the next reboot.
        if let Ok(out) = self.schtasks(&["/end", "/tn", &self.task.name]).await
            && !out.success
        {
            log::debug!("schtasks /end: {}", out.combined().trim());
        }

        self.schtasks(&["/delete", "/tn", &self.task.name, "/f"])
            .await?
            .into_checked("schtasks /delete")?;
        log::info!("Removed scheduled task {}", self.task.name);
        Ok(())
    }

    async fn task_exists(&self) -> Result<bool> {
        let output = self.schtasks(&["/query", "/tn", &self.task.name]).await?;
        if output.success {
            return Ok(true);
        }
        if reports_missing_task(&output) {
            return Ok(false);
        }
        Err(MonitorError::Command {
            program: "schtasks /query".to_string(),
            message: output.combined().trim().to_string(),
        })
    }

    async fn task_status(&self) -> Result<TaskStatus> {
        let output = self
            .schtasks(&["/query", "/tn", &self.task.name, "/fo", "LIST"])
            .await?;
        if !output.success && reports_missing_task(&output) {
            return Ok(TaskStatus::NotInstalled);
        }
        let output = output.into_checked("schtasks /query")?;
        Ok(parse_schtasks_status(&output.stdout))
    }
}
