//! Host service control - delegates to the OS-native service manager
//!
//! - Windows: Service Control Manager (`sc.exe`), port table via `netstat`
//! - Linux: systemd (`systemctl`), port table via `ss`

use std::sync::Arc;

use crate::command::CommandRunner;
use crate::probe::{PortProbe, ServiceController};

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        mod windows_control;
        use windows_control as platform;
    } else if #[cfg(target_os = "linux")] {
        mod linux_control;
        use linux_control as platform;
    } else {
        compile_error!("svcguard supports Windows and Linux hosts only");
    }
}

/// Controller for the named service on this host.
pub fn service_controller(
    service_name: &str,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ServiceController> {
    platform::service_controller(service_name, runner)
}

/// Port-to-PID resolution and process termination on this host.
pub fn port_probe(runner: Arc<dyn CommandRunner>) -> Arc<dyn PortProbe> {
    platform::port_probe(runner)
}
