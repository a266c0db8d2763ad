//! Capability traits for everything the orchestrator and monitor ask of the host,
//! plus the port-table parsers used by the platform implementations.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::health::HealthCheckResult;
use crate::state::ServiceState;

/// OS service manager for one named service.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Current state. A service that is not registered is `NotInstalled`, not an error.
    async fn query_state(&self) -> Result<ServiceState>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Resolves which process listens on a TCP port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn find_pid_by_port(&self, port: u16) -> Result<Option<u32>>;

    /// Forcefully terminate `pid`. A process that is already gone counts as success.
    async fn kill(&self, pid: u32) -> Result<()>;
}

/// Probes the application's HTTP health endpoint.
#[async_trait]
pub trait HealthEndpointClient: Send + Sync {
    async fn check(&self, path: &str, timeout: Duration) -> HealthCheckResult;
}

static PID_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pid=(\d+)").expect("static regex is valid"));

/// Port component of `0.0.0.0:3000`, `[::]:3000` or `*:3000`.
fn local_port(addr: &str) -> Option<u16> {
    addr.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}

/// Find the PID listening on `port` in `netstat -ano` output.
///
/// ```text
///   Proto  Local Address          Foreign Address        State           PID
///   TCP    0.0.0.0:3000           0.0.0.0:0              LISTENING       4312
///   TCP    [::]:3000              [::]:0                 LISTENING       4312
/// ```
pub fn parse_netstat(output: &str, port: u16) -> Option<u32> {
    output.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 || !cols[0].eq_ignore_ascii_case("TCP") {
            return None;
        }
        if cols[3] != "LISTENING" || local_port(cols[1]) != Some(port) {
            return None;
        }
        cols[4].parse::<u32>().ok().filter(|pid| *pid != 0)
    })
}

/// Find the PID listening on `port` in `ss -ltnpH` output.
///
/// ```text
/// LISTEN 0 511 *:3000 *:* users:(("node",pid=4312,fd=21))
/// ```
pub fn parse_ss(output: &str, port: u16) -> Option<u32> {
    output.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 || cols[0] != "LISTEN" || local_port(cols[3]) != Some(port) {
            return None;
        }
        PID_FIELD
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETSTAT: &str = "\r
Active Connections\r
\r
  Proto  Local Address          Foreign Address        State           PID\r
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1032\r
  TCP    0.0.0.0:30000          0.0.0.0:0              LISTENING       77\r
  TCP    127.0.0.1:3000         127.0.0.1:51234        ESTABLISHED     4312\r
  TCP    0.0.0.0:3000           0.0.0.0:0              LISTENING       4312\r
  TCP    [::]:3000              [::]:0                 LISTENING       4312\r
  UDP    0.0.0.0:3000           *:*                                    999\r
";

    #[test]
    fn netstat_finds_listener_on_exact_port() {
        assert_eq!(parse_netstat(NETSTAT, 3000), Some(4312));
        assert_eq!(parse_netstat(NETSTAT, 30000), Some(77));
        assert_eq!(parse_netstat(NETSTAT, 135), Some(1032));
    }

    #[test]
    fn netstat_ignores_other_ports_and_states() {
        assert_eq!(parse_netstat(NETSTAT, 300), None);
        assert_eq!(parse_netstat(NETSTAT, 51234), None);
        let only_established =
            "  TCP    127.0.0.1:3000         127.0.0.1:51234        ESTABLISHED     4312\r\n";
        assert_eq!(parse_netstat(only_established, 3000), None);
    }

    #[test]
    fn netstat_ipv6_only_listener() {
        let out = "  TCP    [::]:3000              [::]:0                 LISTENING       812\r\n";
        assert_eq!(parse_netstat(out, 3000), Some(812));
    }

    #[test]
    fn netstat_skips_system_idle_pid() {
        let out = "  TCP    0.0.0.0:3000           0.0.0.0:0              LISTENING       0\r\n";
        assert_eq!(parse_netstat(out, 3000), None);
    }

    #[test]
    fn ss_finds_listener() {
        let out = "LISTEN 0 511 *:3000 *:* users:((\"node\",pid=4312,fd=21))\n\
                   LISTEN 0 128 127.0.0.1:5432 0.0.0.0:* users:((\"postgres\",pid=900,fd=5))\n";
        assert_eq!(parse_ss(out, 3000), Some(4312));
        assert_eq!(parse_ss(out, 5432), Some(900));
        assert_eq!(parse_ss(out, 8080), None);
    }

    #[test]
    fn ss_without_process_info() {
        // Sockets owned by other users show no users:(...) column without root.
        let out = "LISTEN 0 511 *:3000 *:*\n";
        assert_eq!(parse_ss(out, 3000), None);
    }
}
