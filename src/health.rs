//! HTTP health probing of the supervised application.
//!
//! The primary transport is an in-process `reqwest` client. When it cannot
//! produce an HTTP response at all (connection refused, TLS/DNS failure) the
//! probe retries once through an external client: `curl` on Unix and
//! PowerShell `Invoke-WebRequest` on Windows. Only when both transports fail is
//! the result marked critical.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::CommandRunner;
use crate::probe::HealthEndpointClient;

/// Outcome of a single health probe. Produced fresh each time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub reason: String,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_pid: Option<u32>,
}

impl HealthCheckResult {
    pub fn healthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: true,
            reason: reason.into(),
            critical: false,
            port_pid: None,
        }
    }

    /// Transient failure; the next tick may well succeed.
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
            critical: false,
            port_pid: None,
        }
    }

    pub fn critical(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
            critical: true,
            port_pid: None,
        }
    }

    pub fn with_port_pid(mut self, pid: Option<u32>) -> Self {
        self.port_pid = pid;
        self
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
}

/// Map an HTTP status and body to a health result.
///
/// Healthy only for a 2xx response whose JSON body has `"status": "healthy"`.
pub fn interpret_response(status: u16, body: &str) -> HealthCheckResult {
    if !(200..300).contains(&status) {
        return HealthCheckResult::unhealthy(format!("health endpoint returned HTTP {status}"));
    }

    match serde_json::from_str::<HealthBody>(body) {
        Ok(HealthBody {
            status: Some(reported),
        }) if reported == "healthy" => HealthCheckResult::healthy("health endpoint reports healthy"),
        Ok(HealthBody {
            status: Some(reported),
        }) => HealthCheckResult::unhealthy(format!("health endpoint reports status '{reported}'")),
        Ok(HealthBody { status: None }) => {
            HealthCheckResult::unhealthy("health response has no status field")
        }
        Err(e) => HealthCheckResult::unhealthy(format!("malformed health response: {e}")),
    }
}

/// Split `curl -w '\n%{http_code}'` output into (status, body).
pub fn split_curl_output(stdout: &str) -> Option<(u16, String)> {
    let trimmed = stdout.trim_end_matches(['\r', '\n']);
    let (body, code) = match trimmed.rsplit_once('\n') {
        Some((body, code)) => (body, code),
        None => ("", trimmed),
    };
    let status = code.trim().parse::<u16>().ok().filter(|s| *s != 0)?;
    Some((status, body.to_string()))
}

/// Split the PowerShell fallback output (status on the first line, body after).
pub fn split_status_first(stdout: &str) -> Option<(u16, String)> {
    let mut lines = stdout.splitn(2, '\n');
    let status = lines.next()?.trim().parse::<u16>().ok()?;
    let body = lines.next().unwrap_or("").trim().to_string();
    Some((status, body))
}

/// Probes `http://localhost:<port><path>`.
pub struct HttpHealthProber {
    base_url: String,
    client: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
}

impl HttpHealthProber {
    pub fn new(port: u16, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_base_url(format!("http://localhost:{port}"), runner)
    }

    pub fn with_base_url(base_url: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            runner,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn probe_primary(&self, url: &str, timeout: Duration) -> Result<(u16, String), PrimaryError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PrimaryError::Timeout
                } else {
                    PrimaryError::Transport(e.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                PrimaryError::Timeout
            } else {
                PrimaryError::Transport(e.to_string())
            }
        })?;
        Ok((status, body))
    }

    async fn probe_fallback(&self, url: &str, timeout: Duration) -> Result<(u16, String), String> {
        let secs = timeout.as_secs().max(1);
        let (program, args) = fallback_command(url, secs);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .runner
            .run(program, &arg_refs)
            .await
            .map_err(|e| e.to_string())?;
        if !output.success {
            return Err(format!(
                "{program} exited with {:?}: {}",
                output.code,
                output.stderr.trim()
            ));
        }
        split_fallback_output(&output.stdout)
            .ok_or_else(|| format!("{program} produced no HTTP status"))
    }
}

#[cfg(windows)]
fn fallback_command(url: &str, secs: u64) -> (&'static str, Vec<String>) {
    let script = format!(
        "try {{ $r = Invoke-WebRequest -UseBasicParsing -TimeoutSec {secs} -Uri '{url}'; \
         Write-Output $r.StatusCode; Write-Output $r.Content }} \
         catch {{ if ($_.Exception.Response) {{ Write-Output ([int]$_.Exception.Response.StatusCode) }} else {{ exit 1 }} }}"
    );
    (
        "powershell",
        vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script,
        ],
    )
}

#[cfg(not(windows))]
fn fallback_command(url: &str, secs: u64) -> (&'static str, Vec<String>) {
    (
        "curl",
        vec![
            "-s".to_string(),
            "--max-time".to_string(),
            secs.to_string(),
            "-w".to_string(),
            "\n%{http_code}".to_string(),
            url.to_string(),
        ],
    )
}

#[cfg(windows)]
fn split_fallback_output(stdout: &str) -> Option<(u16, String)> {
    split_status_first(stdout)
}

#[cfg(not(windows))]
fn split_fallback_output(stdout: &str) -> Option<(u16, String)> {
    split_curl_output(stdout)
}

enum PrimaryError {
    Timeout,
    Transport(String),
}

#[async_trait]
impl HealthEndpointClient for HttpHealthProber {
    async fn check(&self, path: &str, timeout: Duration) -> HealthCheckResult {
        let url = self.url(path);

        let primary_error = match self.probe_primary(&url, timeout).await {
            Ok((status, body)) => return interpret_response(status, &body),
            Err(PrimaryError::Timeout) => {
                return HealthCheckResult::unhealthy(format!(
                    "health check timed out after {}ms",
                    timeout.as_millis()
                ));
            }
            Err(PrimaryError::Transport(e)) => e,
        };

        log::debug!("Primary health transport failed ({primary_error}), trying fallback");

        match self.probe_fallback(&url, timeout).await {
            Ok((status, body)) => interpret_response(status, &body),
            Err(fallback_error) => HealthCheckResult::critical(format!(
                "health endpoint unreachable: {primary_error}; fallback: {fallback_error}"
            )),
        }
    }
}
