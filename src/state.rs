//! Service state as reported by the OS service manager.
//!
//! The parsers here are the only code that looks at `sc.exe` / `systemctl`
//! text, so output-format drift stays contained in this file.

use std::fmt;

use serde::Serialize;

/// Win32 error returned by `sc.exe` when the service is not registered.
pub const SC_ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    NotInstalled,
    Stopped,
    StartPending,
    StopPending,
    Running,
    Unknown,
}

impl ServiceState {
    /// `Stopped` and `NotInstalled` both mean nothing is running under the service manager.
    pub fn is_stopped(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::NotInstalled)
    }

    pub fn is_running(self) -> bool {
        self == ServiceState::Running
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::NotInstalled => "NOT_INSTALLED",
            ServiceState::Stopped => "STOPPED",
            ServiceState::StartPending => "START_PENDING",
            ServiceState::StopPending => "STOP_PENDING",
            ServiceState::Running => "RUNNING",
            ServiceState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// True when `sc.exe` output says the service is not registered.
pub fn sc_reports_missing(output: &str, code: Option<i32>) -> bool {
    code == Some(SC_ERROR_SERVICE_DOES_NOT_EXIST)
        || output.contains("FAILED 1060")
        || output
            .to_ascii_lowercase()
            .contains("does not exist as an installed service")
}

/// Parse `sc.exe query <name>` output.
///
/// ```text
/// SERVICE_NAME: tokens
///         TYPE               : 10  WIN32_OWN_PROCESS
///         STATE              : 4  RUNNING
/// ```
pub fn parse_sc_query(output: &str, code: Option<i32>) -> ServiceState {
    if sc_reports_missing(output, code) {
        return ServiceState::NotInstalled;
    }

    let Some(value) = output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "STATE").then(|| value.trim())
    }) else {
        return ServiceState::Unknown;
    };

    let mut tokens = value.split_whitespace();
    let numeric = tokens.next().and_then(|t| t.parse::<u32>().ok());
    let keyword = tokens.next().unwrap_or(value);

    match numeric {
        Some(1) => ServiceState::Stopped,
        Some(2) | Some(5) => ServiceState::StartPending,
        Some(3) => ServiceState::StopPending,
        Some(4) => ServiceState::Running,
        // 6 PAUSE_PENDING and 7 PAUSED are neither up nor down for our purposes.
        Some(_) => ServiceState::Unknown,
        None => match keyword {
            "STOPPED" => ServiceState::Stopped,
            "START_PENDING" | "CONTINUE_PENDING" => ServiceState::StartPending,
            "STOP_PENDING" => ServiceState::StopPending,
            "RUNNING" => ServiceState::Running,
            _ => ServiceState::Unknown,
        },
    }
}

/// Parse `systemctl show <unit> --property=LoadState,ActiveState` output.
pub fn parse_systemctl_show(output: &str) -> ServiceState {
    let mut load_state = None;
    let mut active_state = None;
    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("LoadState", v)) => load_state = Some(v.trim()),
            Some(("ActiveState", v)) => active_state = Some(v.trim()),
            _ => {}
        }
    }

    if matches!(load_state, Some("not-found") | Some("masked")) {
        return ServiceState::NotInstalled;
    }

    match active_state {
        Some("active") => ServiceState::Running,
        Some("inactive") | Some("failed") => ServiceState::Stopped,
        Some("activating") | Some("reloading") => ServiceState::StartPending,
        Some("deactivating") => ServiceState::StopPending,
        _ => ServiceState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc_output(state_line: &str) -> String {
        format!(
            "\r\nSERVICE_NAME: ElectricityTokensTracker\r\n        TYPE               : 10  WIN32_OWN_PROCESS\r\n        STATE              : {state_line}\r\n                                (STOPPABLE, NOT_PAUSABLE, ACCEPTS_SHUTDOWN)\r\n        WIN32_EXIT_CODE    : 0  (0x0)\r\n        SERVICE_EXIT_CODE  : 0  (0x0)\r\n        CHECKPOINT         : 0x0\r\n        WAIT_HINT          : 0x0\r\n"
        )
    }

    #[test]
    fn sc_query_numeric_states() {
        let cases = [
            ("1  STOPPED", ServiceState::Stopped),
            ("2  START_PENDING", ServiceState::StartPending),
            ("3  STOP_PENDING", ServiceState::StopPending),
            ("4  RUNNING", ServiceState::Running),
            ("5  CONTINUE_PENDING", ServiceState::StartPending),
            ("6  PAUSE_PENDING", ServiceState::Unknown),
            ("7  PAUSED", ServiceState::Unknown),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_sc_query(&sc_output(line), Some(0)), expected, "{line}");
        }
    }

    #[test]
    fn sc_query_keyword_only() {
        assert_eq!(
            parse_sc_query(&sc_output("RUNNING"), Some(0)),
            ServiceState::Running
        );
        assert_eq!(
            parse_sc_query(&sc_output("STOP_PENDING"), Some(0)),
            ServiceState::StopPending
        );
    }

    #[test]
    fn sc_query_missing_service() {
        let out = "[SC] EnumQueryServicesStatus:OpenService FAILED 1060:\r\n\r\nThe specified service does not exist as an installed service.\r\n";
        assert_eq!(parse_sc_query(out, Some(1060)), ServiceState::NotInstalled);
        // Exit code alone is enough.
        assert_eq!(parse_sc_query("", Some(1060)), ServiceState::NotInstalled);
        // Text alone is enough.
        assert_eq!(parse_sc_query(out, Some(1)), ServiceState::NotInstalled);
    }

    #[test]
    fn sc_query_garbage_is_unknown() {
        assert_eq!(parse_sc_query("", Some(0)), ServiceState::Unknown);
        assert_eq!(
            parse_sc_query("Access is denied.", Some(5)),
            ServiceState::Unknown
        );
    }

    #[test]
    fn systemctl_states() {
        let cases = [
            ("LoadState=loaded\nActiveState=active\n", ServiceState::Running),
            ("LoadState=loaded\nActiveState=inactive\n", ServiceState::Stopped),
            ("LoadState=loaded\nActiveState=failed\n", ServiceState::Stopped),
            ("LoadState=loaded\nActiveState=activating\n", ServiceState::StartPending),
            ("LoadState=loaded\nActiveState=reloading\n", ServiceState::StartPending),
            ("LoadState=loaded\nActiveState=deactivating\n", ServiceState::StopPending),
            ("LoadState=not-found\nActiveState=inactive\n", ServiceState::NotInstalled),
            ("LoadState=masked\nActiveState=inactive\n", ServiceState::NotInstalled),
            ("LoadState=loaded\nActiveState=maintenance\n", ServiceState::Unknown),
            ("", ServiceState::Unknown),
        ];
        for (out, expected) in cases {
            assert_eq!(parse_systemctl_show(out), expected, "{out:?}");
        }
    }

    #[test]
    fn stopped_covers_not_installed() {
        assert!(ServiceState::Stopped.is_stopped());
        assert!(ServiceState::NotInstalled.is_stopped());
        assert!(!ServiceState::StopPending.is_stopped());
        assert!(!ServiceState::Running.is_stopped());
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(ServiceState::NotInstalled.to_string(), "NOT_INSTALLED");
        assert_eq!(
            serde_json::to_string(&ServiceState::StartPending).unwrap(),
            "\"START_PENDING\""
        );
    }
}
