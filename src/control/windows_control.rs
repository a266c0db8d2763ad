//! Windows service control through `sc.exe`, `netstat` and `taskkill`

use std::sync::Arc;

use async_trait::async_trait;

use crate::command::CommandRunner;
use crate::error::{MonitorError, Result};
use crate::probe::{PortProbe, ServiceController, parse_netstat};
use crate::state::{ServiceState, parse_sc_query, sc_reports_missing};

/// ERROR_SERVICE_ALREADY_RUNNING
const SC_ALREADY_RUNNING: i32 = 1056;
/// ERROR_SERVICE_NOT_ACTIVE
const SC_NOT_ACTIVE: i32 = 1062;

pub(super) fn service_controller(
    service_name: &str,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ServiceController> {
    Arc::new(ScServiceController {
        service_name: service_name.to_string(),
        runner,
    })
}

pub(super) fn port_probe(runner: Arc<dyn CommandRunner>) -> Arc<dyn PortProbe> {
    Arc::new(NetstatPortProbe { runner })
}

struct ScServiceController {
    service_name: String,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl ServiceController for ScServiceController {
    async fn query_state(&self) -> Result<ServiceState> {
        let output = self
            .runner
            .run("sc.exe", &["query", &self.service_name])
            .await?;

        let text = output.combined();
        if sc_reports_missing(&text, output.code) {
            return Ok(ServiceState::NotInstalled);
        }
        let output = output.into_checked("sc.exe query")?;
        Ok(parse_sc_query(&output.stdout, output.code))
    }

    async fn start(&self) -> Result<()> {
        let output = self
            .runner
            .run("sc.exe", &["start", &self.service_name])
            .await?;
        if output.code == Some(SC_ALREADY_RUNNING) {
            log::debug!("{} was already running", self.service_name);
            return Ok(());
        }
        output.into_checked("sc.exe start").map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        let output = self
            .runner
            .run("sc.exe", &["stop", &self.service_name])
            .await?;
        if output.code == Some(SC_NOT_ACTIVE) {
            log::debug!("{} was not running", self.service_name);
            return Ok(());
        }
        output.into_checked("sc.exe stop").map(|_| ())
    }
}

struct NetstatPortProbe {
    runner: Arc<dyn CommandRunner>,
}

impl NetstatPortProbe {
    /// `Get-NetTCPConnection` fallback for hosts where netstat is unavailable or fails.
    async fn find_with_powershell(&self, port: u16) -> Result<Option<u32>> {
        let script = format!(
            "Get-NetTCPConnection -LocalPort {port} -State Listen -ErrorAction SilentlyContinue \
             | Select-Object -First 1 -ExpandProperty OwningProcess"
        );
        let output = self
            .runner
            .run("powershell", &["-NoProfile", "-NonInteractive", "-Command", &script])
            .await?
            .into_checked("powershell Get-NetTCPConnection")?;

        let trimmed = output.stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u32>()
            .map(|pid| (pid != 0).then_some(pid))
            .map_err(|e| MonitorError::Parse {
                what: "Get-NetTCPConnection output",
                detail: format!("{trimmed:?}: {e}"),
            })
    }
}

#[async_trait]
impl PortProbe for NetstatPortProbe {
    async fn find_pid_by_port(&self, port: u16) -> Result<Option<u32>> {
        let netstat = self
            .runner
            .run("netstat", &["-ano", "-p", "TCP"])
            .await
            .and_then(|o| o.into_checked("netstat"));

        match netstat {
            Ok(output) => Ok(parse_netstat(&output.stdout, port)),
            Err(e) => {
                log::debug!("netstat unavailable ({e}), falling back to PowerShell");
                self.find_with_powershell(port).await
            }
        }
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        let pid_arg = pid.to_string();
        let output = self
            .runner
            .run("taskkill", &["/PID", &pid_arg, "/F"])
            .await?;
        if !output.success && output.combined().contains("not found") {
            log::debug!("PID {pid} already exited");
            return Ok(());
        }
        output.into_checked("taskkill").map(|_| ())
    }
}
