//! Every OS interaction goes through [`CommandRunner`], so controllers and the
//! task installer can be exercised against scripted output in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MonitorError, Result};

/// Upper bound for a single OS command. `sc.exe` and `schtasks` normally answer in
/// well under a second; a hung child is killed rather than blocking a tick forever.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with an exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout and stderr joined; some tools (sc.exe) report errors on stdout.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into a [`MonitorError::Command`].
    pub fn into_checked(self, program: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(MonitorError::Command {
                program: program.to_string(),
                message: format!(
                    "exit code {}: {}",
                    self.code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                    self.combined().trim()
                ),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs real processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let binary_path = which::which(program).map_err(|_| MonitorError::CommandNotFound {
            program: program.to_string(),
        })?;

        log::debug!("exec {} {}", binary_path.display(), args.join(" "));

        let child = tokio::process::Command::new(&binary_path)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MonitorError::CommandNotFound {
                    program: program.to_string(),
                });
            }
            Ok(Err(e)) => {
                return Err(MonitorError::Command {
                    program: program.to_string(),
                    message: format!("failed to spawn: {e}"),
                });
            }
            Err(_) => {
                return Err(MonitorError::Command {
                    program: program.to_string(),
                    message: format!("timed out after {COMMAND_TIMEOUT:?}"),
                });
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
