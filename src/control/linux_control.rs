//! Linux service control using systemd (systemctl) and `ss`

use std::sync::Arc;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::command::CommandRunner;
use crate::error::{MonitorError, Result};
use crate::probe::{PortProbe, ServiceController, parse_ss};
use crate::state::{ServiceState, parse_systemctl_show};

pub(super) fn service_controller(
    service_name: &str,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ServiceController> {
    Arc::new(SystemdController::new(service_name, is_root(), runner))
}

pub(super) fn port_probe(runner: Arc<dyn CommandRunner>) -> Arc<dyn PortProbe> {
    Arc::new(SsPortProbe { runner })
}

/// Check if running as root
#[inline]
fn is_root() -> bool {
    nix::unistd::getuid().is_root()
}

struct SystemdController {
    unit: String,
    /// Root talks to the system manager, everyone else to their user manager.
    system: bool,
    runner: Arc<dyn CommandRunner>,
}

impl SystemdController {
    fn new(service_name: &str, system: bool, runner: Arc<dyn CommandRunner>) -> Self {
        let unit = if service_name.ends_with(".service") {
            service_name.to_string()
        } else {
            format!("{service_name}.service")
        };
        Self {
            unit,
            system,
            runner,
        }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<crate::command::CommandOutput> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if !self.system {
            full.push("--user");
        }
        full.extend_from_slice(args);
        self.runner.run("systemctl", &full).await
    }
}

#[async_trait]
impl ServiceController for SystemdController {
    async fn query_state(&self) -> Result<ServiceState> {
        let output = self
            .systemctl(&[
                "show",
                &self.unit,
                "--property=LoadState,ActiveState",
                "--no-pager",
            ])
            .await?
            .into_checked("systemctl show")?;
        Ok(parse_systemctl_show(&output.stdout))
    }

    async fn start(&self) -> Result<()> {
        self.systemctl(&["start", &self.unit])
            .await?
            .into_checked("systemctl start")
            .map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.systemctl(&["stop", &self.unit])
            .await?
            .into_checked("systemctl stop")
            .map(|_| ())
    }
}

struct SsPortProbe {
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl PortProbe for SsPortProbe {
    async fn find_pid_by_port(&self, port: u16) -> Result<Option<u32>> {
        let filter = format!("sport = :{port}");
        let output = self
            .runner
            .run("ss", &["-ltnpH", &filter])
            .await?
            .into_checked("ss")?;
        Ok(parse_ss(&output.stdout, port))
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        let raw = i32::try_from(pid).map_err(|_| MonitorError::Parse {
            what: "pid",
            detail: format!("{pid} out of range"),
        })?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                log::info!("Sent SIGKILL to PID {pid}");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                log::debug!("PID {pid} already exited");
                Ok(())
            }
            Err(Errno::EPERM) => Err(MonitorError::PermissionDenied(format!("kill PID {pid}"))),
            Err(e) => Err(MonitorError::Command {
                program: "kill".to_string(),
                message: format!("PID {pid}: {e}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn user_scope_and_unit_suffix() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push_ok("LoadState=loaded\nActiveState=active\n");
        let ctl = SystemdController::new("tokens", false, runner.clone());

        assert_eq!(ctl.query_state().await.unwrap(), ServiceState::Running);
        assert_eq!(
            runner.calls()[0],
            vec![
                "systemctl",
                "--user",
                "show",
                "tokens.service",
                "--property=LoadState,ActiveState",
                "--no-pager"
            ]
        );
    }

    #[tokio::test]
    async fn unknown_unit_is_not_installed() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push_ok("LoadState=not-found\nActiveState=inactive\n");
        let ctl = SystemdController::new("tokens.service", true, runner.clone());

        assert_eq!(ctl.query_state().await.unwrap(), ServiceState::NotInstalled);
        assert_eq!(runner.calls()[0][1], "show");
    }

    #[tokio::test]
    async fn failed_start_is_an_error() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(Ok(CommandOutput::failed(5, "Unit tokens.service not found.")));
        let ctl = SystemdController::new("tokens", true, runner);
        assert!(ctl.start().await.is_err());
    }

    #[tokio::test]
    async fn ss_probe_parses_listener() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push_ok("LISTEN 0 511 *:3000 *:* users:((\"node\",pid=4312,fd=21))\n");
        let probe = SsPortProbe {
            runner: runner.clone(),
        };
        assert_eq!(probe.find_pid_by_port(3000).await.unwrap(), Some(4312));
        assert_eq!(runner.calls()[0], vec!["ss", "-ltnpH", "sport = :3000"]);
    }
}
