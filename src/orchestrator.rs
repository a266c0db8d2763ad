//! Synchronous stop → verify → start → verify restart cycle.
//!
//! Every method takes `&mut self`: a restart is strictly sequential and only one
//! can be in flight per orchestrator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::MonitorConfig;
use crate::control;
use crate::error::{MonitorError, Result, WaitPhase};
use crate::health::{HealthCheckResult, HttpHealthProber};
use crate::pidfile::PidFile;
use crate::probe::{HealthEndpointClient, PortProbe, ServiceController};
use crate::state::ServiceState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartPhase {
    Idle,
    Stopping,
    StoppedConfirmed,
    Starting,
    StartedConfirmed,
    Healthy,
    Failed(String),
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Idle => f.write_str("IDLE"),
            RestartPhase::Stopping => f.write_str("STOPPING"),
            RestartPhase::StoppedConfirmed => f.write_str("STOPPED_CONFIRMED"),
            RestartPhase::Starting => f.write_str("STARTING"),
            RestartPhase::StartedConfirmed => f.write_str("STARTED_CONFIRMED"),
            RestartPhase::Healthy => f.write_str("HEALTHY"),
            RestartPhase::Failed(reason) => write!(f, "FAILED ({reason})"),
        }
    }
}

/// Point-in-time view of the service for status output and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: ServiceState,
    pub port_pid: Option<u32>,
    pub pid_file_pid: Option<u32>,
    /// Something holds the port while the service manager says it is not running.
    pub orphaned: bool,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = |p: Option<u32>| p.map_or_else(|| "none".to_string(), |p| p.to_string());
        write!(
            f,
            "state={} port_pid={} pid_file={} orphaned={}",
            self.state,
            pid(self.port_pid),
            pid(self.pid_file_pid),
            self.orphaned
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub service_name: String,
    pub port: u16,
    /// Endpoint used to confirm a start; must not require authentication.
    pub health_path: String,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_attempts: u32,
    pub start_attempts: u32,
    pub settle_delay: Duration,
}

impl From<&MonitorConfig> for OrchestratorConfig {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            service_name: cfg.service_name.clone(),
            port: cfg.port,
            health_path: cfg.public_health_path.clone(),
            http_timeout: cfg.http_timeout(),
            poll_interval: cfg.poll_interval(),
            stop_attempts: cfg.stop_attempts,
            start_attempts: cfg.start_attempts,
            settle_delay: cfg.settle_delay(),
        }
    }
}

pub struct RestartOrchestrator {
    cfg: OrchestratorConfig,
    service: Arc<dyn ServiceController>,
    ports: Arc<dyn PortProbe>,
    health: Arc<dyn HealthEndpointClient>,
    pid_file: PidFile,
    phase: RestartPhase,
}

impl RestartOrchestrator {
    /// Orchestrator over explicit host capabilities; starts in [`RestartPhase::Idle`].
    pub fn new(
        cfg: OrchestratorConfig,
        service: Arc<dyn ServiceController>,
        ports: Arc<dyn PortProbe>,
        health: Arc<dyn HealthEndpointClient>,
        pid_file: PidFile,
    ) -> Self {
        Self {
            cfg,
            service,
            ports,
            health,
            pid_file,
            phase: RestartPhase::Idle,
        }
    }

    /// Wire the orchestrator to the real host: OS service manager, port table and HTTP.
    pub fn for_host(cfg: &MonitorConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self::new(
            OrchestratorConfig::from(cfg),
            control::service_controller(&cfg.service_name, runner.clone()),
            control::port_probe(runner.clone()),
            Arc::new(HttpHealthProber::new(cfg.port, runner)),
            PidFile::new(&cfg.pid_file),
        )
    }

    pub fn phase(&self) -> &RestartPhase {
        &self.phase
    }

    fn fail(&mut self, phase: WaitPhase) -> MonitorError {
        let err = MonitorError::Timeout {
            service: self.cfg.service_name.clone(),
            phase,
        };
        self.phase = RestartPhase::Failed(err.to_string());
        log::error!("{err}");
        err
    }

    async fn query_state(&self) -> ServiceState {
        match self.service.query_state().await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Could not query {}: {e}", self.cfg.service_name);
                ServiceState::Unknown
            }
        }
    }

    async fn port_pid(&self) -> Option<u32> {
        match self.ports.find_pid_by_port(self.cfg.port).await {
            Ok(pid) => pid,
            Err(e) => {
                log::warn!("Could not resolve listener on port {}: {e}", self.cfg.port);
                None
            }
        }
    }

    /// Service state, port owner and HTTP health for `path`.
    ///
    /// The HTTP probe is skipped when the service manager does not report RUNNING.
    pub async fn inspect(&self, path: &str) -> HealthCheckResult {
        let state = match self.service.query_state().await {
            Ok(state) => state,
            Err(e) => {
                return HealthCheckResult::unhealthy(format!(
                    "could not query service {}: {e}",
                    self.cfg.service_name
                ));
            }
        };
        let port_pid = self.port_pid().await;

        if !state.is_running() {
            return HealthCheckResult::unhealthy(format!(
                "service {} is {state}",
                self.cfg.service_name
            ))
            .with_port_pid(port_pid);
        }

        self.health
            .check(path, self.cfg.http_timeout)
            .await
            .with_port_pid(port_pid)
    }

    /// Service state, port owner and recorded PID. Probe failures degrade to
    /// `Unknown`/`None` instead of erroring.
    pub async fn status(&self) -> StatusSnapshot {
        let state = self.query_state().await;
        let port_pid = self.port_pid().await;
        let pid_file_pid = self.pid_file.read().unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable PID file: {e}");
            None
        });
        StatusSnapshot {
            state,
            port_pid,
            pid_file_pid,
            orphaned: !state.is_running() && port_pid.is_some(),
        }
    }

    /// Poll until the service manager reports stopped and nothing holds the port.
    ///
    /// A listener that survives a stopped service is force-killed.
    pub async fn wait_for_service_to_stop(&mut self) -> bool {
        for attempt in 1..=self.cfg.stop_attempts {
            let state = self.query_state().await;
            if state.is_stopped() {
                match self.port_pid().await {
                    None => return true,
                    Some(pid) => {
                        log::warn!(
                            "{} reports {state} but PID {pid} still holds port {}; terminating orphan",
                            self.cfg.service_name,
                            self.cfg.port
                        );
                        if let Err(e) = self.ports.kill(pid).await {
                            log::error!("Failed to terminate orphaned PID {pid}: {e}");
                        } else if self.port_pid().await.is_none() {
                            return true;
                        }
                    }
                }
            } else {
                log::debug!(
                    "Waiting for {} to stop ({attempt}/{}): {state}",
                    self.cfg.service_name,
                    self.cfg.stop_attempts
                );
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
        false
    }

    /// Poll until the service is RUNNING, owns the port and answers healthy.
    pub async fn wait_for_service_to_start(&mut self) -> bool {
        for attempt in 1..=self.cfg.start_attempts {
            let state = self.query_state().await;
            let port_pid = self.port_pid().await;

            if state.is_running() && port_pid.is_some() {
                self.phase = RestartPhase::StartedConfirmed;
                let health = self
                    .health
                    .check(&self.cfg.health_path, self.cfg.http_timeout)
                    .await;
                if health.healthy {
                    return true;
                }
                log::debug!(
                    "{} is up but not healthy yet ({attempt}/{}): {}",
                    self.cfg.service_name,
                    self.cfg.start_attempts,
                    health.reason
                );
            } else {
                log::debug!(
                    "Waiting for {} to start ({attempt}/{}): state={state} port_pid={port_pid:?}",
                    self.cfg.service_name,
                    self.cfg.start_attempts
                );
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
        false
    }

    /// Stop the service and wait until it is stopped with its port free.
    ///
    /// Already stopped with a free port is a no-op. Returns
    /// [`MonitorError::Timeout`] when `stop_attempts` polls run out.
    pub async fn stop_service(&mut self) -> Result<()> {
        self.phase = RestartPhase::Stopping;
        let state = self.query_state().await;

        if state.is_stopped() && self.port_pid().await.is_none() {
            log::info!("{} is already stopped ({state})", self.cfg.service_name);
        } else {
            if state.is_stopped() || state == ServiceState::StopPending {
                log::info!("{} is {state}, not issuing stop", self.cfg.service_name);
            } else {
                log::info!("Stopping {} (currently {state})", self.cfg.service_name);
                if let Err(e) = self.service.stop().await {
                    // The polling below is the authority on whether it stopped.
                    log::warn!("Stop command for {} failed: {e}", self.cfg.service_name);
                }
            }

            if !self.wait_for_service_to_stop().await {
                return Err(self.fail(WaitPhase::Stop));
            }
        }

        self.clear_pid_file().await;
        self.phase = RestartPhase::StoppedConfirmed;
        log::info!("{} stopped", self.cfg.service_name);
        Ok(())
    }

    /// Start the service and wait until it is RUNNING, owns the port and is healthy.
    ///
    /// No start command is issued when it is already up, or still coming up.
    pub async fn start_service(&mut self) -> Result<()> {
        self.phase = RestartPhase::Starting;
        let state = self.query_state().await;

        if state == ServiceState::NotInstalled {
            let reason = format!("service {} is not installed", self.cfg.service_name);
            self.phase = RestartPhase::Failed(reason.clone());
            return Err(MonitorError::Command {
                program: "start".to_string(),
                message: reason,
            });
        }

        if state.is_running()
            && let Some(pid) = self.port_pid().await
            && self
                .health
                .check(&self.cfg.health_path, self.cfg.http_timeout)
                .await
                .healthy
        {
            log::info!(
                "{} is already running and healthy (PID {pid})",
                self.cfg.service_name
            );
            self.record_pid(pid);
            self.phase = RestartPhase::Healthy;
            return Ok(());
        }

        if state.is_running() || state == ServiceState::StartPending {
            log::info!("{} is {state}, waiting for it to become healthy", self.cfg.service_name);
        } else {
            log::info!("Starting {}", self.cfg.service_name);
            if let Err(e) = self.service.start().await {
                self.phase = RestartPhase::Failed(e.to_string());
                return Err(e);
            }
        }

        if !self.wait_for_service_to_start().await {
            return Err(self.fail(WaitPhase::Start));
        }

        if let Some(pid) = self.port_pid().await {
            self.record_pid(pid);
        }
        self.phase = RestartPhase::Healthy;
        log::info!("{} started and healthy", self.cfg.service_name);
        Ok(())
    }

    /// The stop is already confirmed, so a stale PID file only earns a warning.
    async fn clear_pid_file(&self) {
        if let Err(e) = self.pid_file.remove().await {
            log::warn!(
                "Could not remove PID file {}: {e}",
                self.pid_file.path().display()
            );
        }
    }

    fn record_pid(&self, pid: u32) {
        if let Err(e) = self.pid_file.write(pid) {
            log::warn!(
                "Could not write PID file {}: {e}",
                self.pid_file.path().display()
            );
        }
    }

    /// Full restart cycle; returns the final status snapshot.
    pub async fn restart(&mut self) -> Result<StatusSnapshot> {
        self.phase = RestartPhase::Idle;
        log::info!("Restarting {}", self.cfg.service_name);

        self.stop_service().await?;
        tokio::time::sleep(self.cfg.settle_delay).await;
        self.start_service().await?;

        let snapshot = self.status().await;
        log::info!("Restart of {} complete: {snapshot}", self.cfg.service_name);
        Ok(snapshot)
    }
}
