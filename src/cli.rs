use std::path::PathBuf;

use clap::{Parser, Subcommand};
use svcguard::config::{MONITOR_LOG_FILE, SERVICE_LOG_FILE};

#[derive(Parser, Debug)]
#[command(version, about = "svcguard health monitor and service supervisor")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub sub: Cmd,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// Start the service and wait until it is healthy (Exit 0 = success, 1 = failed)
    Start,
    /// Stop the service and free its port (Exit 0 = success, 1 = failed)
    Stop,
    /// Stop, confirm, start and verify the service (Exit 0 = success, 1 = failed)
    Restart,
    /// Show service state and port owner (Exit 0 = running, 1 = not running)
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Probe the health endpoint once (Exit 0 = healthy, 1 = unhealthy)
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Run the monitor loop until interrupted
    Monitor,
    /// Register the monitor as a boot-time task
    Install,
    /// Remove the boot-time task
    Uninstall,
    /// Show whether the boot-time task exists (Exit 0 = installed, 1 = missing)
    Verify,
}

impl Cmd {
    /// Log file this command appends to.
    pub fn log_file(self) -> &'static str {
        match self {
            Cmd::Monitor | Cmd::Check { .. } => MONITOR_LOG_FILE,
            _ => SERVICE_LOG_FILE,
        }
    }

    /// Commands that change service or scheduler state.
    pub fn needs_elevation(self) -> bool {
        matches!(
            self,
            Cmd::Start | Cmd::Stop | Cmd::Restart | Cmd::Install | Cmd::Uninstall
        )
    }
}
