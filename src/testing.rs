//! In-memory stand-ins for the host, used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::{MonitorError, Result};
use crate::health::HealthCheckResult;
use crate::probe::{HealthEndpointClient, PortProbe, ServiceController};
use crate::state::ServiceState;

fn record(calls: &Mutex<Vec<Vec<String>>>, program: &str, args: &[&str]) {
    let mut call = vec![program.to_string()];
    call.extend(args.iter().map(|a| a.to_string()));
    calls.lock().unwrap().push(call);
}

/// Replays queued responses in order, regardless of which command is run.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<CommandOutput>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn push(&self, response: Result<CommandOutput>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_ok(&self, stdout: &str) {
        self.push(Ok(CommandOutput::ok(stdout)));
    }

    /// Each call as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        record(&self.calls, program, args);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(MonitorError::Command {
                    program: program.to_string(),
                    message: "no scripted response left".to_string(),
                })
            })
    }
}

type Handler = dyn FnMut(&str, &[&str]) -> Result<CommandOutput> + Send;

/// Answers each command with a closure, for simulating stateful tools.
pub struct FnRunner {
    handler: Mutex<Box<Handler>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FnRunner {
    pub fn new(handler: impl FnMut(&str, &[&str]) -> Result<CommandOutput> + Send + 'static) -> Self {
        Self {
            handler: Mutex::new(Box::new(handler)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FnRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        record(&self.calls, program, args);
        let mut handler = self.handler.lock().unwrap();
        (*handler)(program, args)
    }
}

/// Observable state of the simulated host plus knobs for its misbehaviour.
#[derive(Debug, Clone)]
pub struct HostState {
    pub state: ServiceState,
    pub port_pid: Option<u32>,
    pub healthy: bool,
    pub start_calls: u32,
    pub stop_calls: u32,
    pub health_checks: u32,
    pub killed: Vec<u32>,
    /// `stop()` reports STOPPED but the listener survives.
    pub orphan_on_stop: bool,
    /// `stop()` leaves the service in STOP_PENDING forever.
    pub stop_hangs: bool,
    /// `start()` leaves the service in START_PENDING forever.
    pub start_hangs: bool,
    pub healthy_after_start: bool,
    pub next_pid: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            state: ServiceState::Stopped,
            port_pid: None,
            healthy: false,
            start_calls: 0,
            stop_calls: 0,
            health_checks: 0,
            killed: Vec::new(),
            orphan_on_stop: false,
            stop_hangs: false,
            start_hangs: false,
            healthy_after_start: true,
            next_pid: 4000,
        }
    }
}

/// One simulated machine implementing every host capability.
#[derive(Debug, Clone, Default)]
pub struct FakeHost(Arc<Mutex<HostState>>);

impl FakeHost {
    pub fn running_healthy(pid: u32) -> Self {
        let host = Self::default();
        host.with(|s| {
            s.state = ServiceState::Running;
            s.port_pid = Some(pid);
            s.healthy = true;
        });
        host
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        f(&mut self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> HostState {
        self.0.lock().unwrap().clone()
    }

    pub fn controller(&self) -> Arc<dyn ServiceController> {
        Arc::new(self.clone())
    }

    pub fn ports(&self) -> Arc<dyn PortProbe> {
        Arc::new(self.clone())
    }

    pub fn health(&self) -> Arc<dyn HealthEndpointClient> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl ServiceController for FakeHost {
    async fn query_state(&self) -> Result<ServiceState> {
        Ok(self.with(|s| s.state))
    }

    async fn start(&self) -> Result<()> {
        self.with(|s| {
            s.start_calls += 1;
            if s.start_hangs {
                s.state = ServiceState::StartPending;
            } else {
                s.state = ServiceState::Running;
                s.port_pid = Some(s.next_pid);
                s.next_pid += 1;
                s.healthy = s.healthy_after_start;
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.with(|s| {
            s.stop_calls += 1;
            s.healthy = false;
            if s.stop_hangs {
                s.state = ServiceState::StopPending;
            } else {
                s.state = ServiceState::Stopped;
                if !s.orphan_on_stop {
                    s.port_pid = None;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl PortProbe for FakeHost {
    async fn find_pid_by_port(&self, _port: u16) -> Result<Option<u32>> {
        Ok(self.with(|s| s.port_pid))
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        self.with(|s| {
            s.killed.push(pid);
            if s.port_pid == Some(pid) {
                s.port_pid = None;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl HealthEndpointClient for FakeHost {
    async fn check(&self, _path: &str, _timeout: Duration) -> HealthCheckResult {
        self.with(|s| {
            s.health_checks += 1;
            if s.healthy {
                HealthCheckResult::healthy("fake endpoint healthy")
            } else {
                HealthCheckResult::unhealthy("fake endpoint unhealthy")
            }
        })
    }
}
