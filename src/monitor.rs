//! Recurring health check with threshold- and cooldown-gated auto-restart.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::config::MonitorConfig;
use crate::health::HealthCheckResult;
use crate::orchestrator::{RestartOrchestrator, StatusSnapshot};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub max_consecutive_failures: u32,
    pub restart_cooldown: Duration,
    pub healthy_log_interval: Duration,
    pub health_path: String,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            check_interval: cfg.check_interval(),
            max_consecutive_failures: cfg.max_consecutive_failures,
            restart_cooldown: cfg.restart_cooldown(),
            healthy_log_interval: cfg.healthy_log_interval(),
            health_path: cfg.health_path.clone(),
        }
    }
}

/// In-memory monitor state; lives exactly as long as the monitor process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSession {
    pub consecutive_failures: u32,
    pub last_restart: Option<Instant>,
    pub is_monitoring: bool,
    /// True while `restart()` runs.
    ///
    /// `tick` borrows the monitor mutably, so ticks never overlap a restart in
    /// this loop; ticks that came due during a long restart are dropped by the
    /// interval's `MissedTickBehavior::Skip`. The flag is visible to anything
    /// inspecting the session, and a tick that finds it still set (its restart
    /// future was dropped) is skipped.
    pub is_restarting: bool,
    pub last_healthy_log: Option<Instant>,
}

/// What a single health result means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Healthy {
        /// Failure count that was cleared, for the recovery log line.
        recovered_from: u32,
        /// Whether the routine "still healthy" line is due.
        log_routine: bool,
    },
    Wait {
        failures: u32,
    },
    Cooldown {
        remaining: Duration,
    },
    Restart,
}

impl MonitorSession {
    /// Time left before another restart is allowed, if any.
    pub fn cooldown_remaining(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        let last = self.last_restart?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Fold one health result into the session.
    ///
    /// On `Restart` the failure counter has already been reset and
    /// `last_restart` stamped, so a failed restart cannot retrigger before the
    /// cooldown has passed.
    pub fn record(&mut self, healthy: bool, now: Instant, settings: &MonitorSettings) -> Decision {
        if healthy {
            let recovered_from = std::mem::take(&mut self.consecutive_failures);
            let log_routine = self.last_healthy_log.is_none_or(|last| {
                now.saturating_duration_since(last) >= settings.healthy_log_interval
            });
            if log_routine {
                self.last_healthy_log = Some(now);
            }
            return Decision::Healthy {
                recovered_from,
                log_routine,
            };
        }

        // Saturates at the threshold while a cooldown holds the restart back.
        self.consecutive_failures =
            (self.consecutive_failures + 1).min(settings.max_consecutive_failures);
        if self.consecutive_failures < settings.max_consecutive_failures {
            return Decision::Wait {
                failures: self.consecutive_failures,
            };
        }

        if let Some(remaining) = self.cooldown_remaining(now, settings.restart_cooldown) {
            return Decision::Cooldown { remaining };
        }

        self.last_restart = Some(now);
        self.consecutive_failures = 0;
        Decision::Restart
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    Healthy,
    Degraded { failures: u32 },
    CooldownSuppressed { remaining: Duration },
    Restarted(StatusSnapshot),
    RestartFailed(String),
}

pub struct HealthMonitor {
    settings: MonitorSettings,
    orchestrator: RestartOrchestrator,
    session: MonitorSession,
}

impl HealthMonitor {
    /// Monitor with a fresh session; nothing runs until [`HealthMonitor::run`] or `tick`.
    pub fn new(settings: MonitorSettings, orchestrator: RestartOrchestrator) -> Self {
        Self {
            settings,
            orchestrator,
            session: MonitorSession::default(),
        }
    }

    pub fn session(&self) -> &MonitorSession {
        &self.session
    }

    /// Single probe of the monitored endpoint, without touching the session.
    pub async fn check_once(&self) -> HealthCheckResult {
        self.orchestrator.inspect(&self.settings.health_path).await
    }

    /// One health check, possibly followed by a blocking restart.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.session.is_restarting {
            log::warn!("Restart still in progress, skipping health check");
            return TickOutcome::Skipped;
        }

        let result = self.check_once().await;
        match self.session.record(result.healthy, now, &self.settings) {
            Decision::Healthy {
                recovered_from,
                log_routine,
            } => {
                if recovered_from > 0 {
                    log::info!("Service recovered after {recovered_from} failed check(s)");
                } else if log_routine {
                    log::info!(
                        "Service healthy (PID {})",
                        result.port_pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
                    );
                }
                TickOutcome::Healthy
            }
            Decision::Wait { failures } => {
                log::warn!(
                    "Health check failed ({failures}/{}): {}{}",
                    self.settings.max_consecutive_failures,
                    result.reason,
                    if result.critical { " [critical]" } else { "" }
                );
                TickOutcome::Degraded { failures }
            }
            Decision::Cooldown { remaining } => {
                log::warn!(
                    "Health check failed: {}; restart still in cooldown for {}s",
                    result.reason,
                    remaining.as_secs()
                );
                TickOutcome::CooldownSuppressed { remaining }
            }
            Decision::Restart => {
                log::error!(
                    "Service unhealthy for {} consecutive checks ({}), restarting",
                    self.settings.max_consecutive_failures,
                    result.reason
                );
                self.session.is_restarting = true;
                let outcome = self.orchestrator.restart().await;
                self.session.is_restarting = false;

                match outcome {
                    Ok(snapshot) => {
                        log::info!("Automatic restart succeeded: {snapshot}");
                        TickOutcome::Restarted(snapshot)
                    }
                    Err(e) => {
                        log::error!("Automatic restart failed, manual intervention required: {e}");
                        TickOutcome::RestartFailed(e.to_string())
                    }
                }
            }
        }
    }

    /// Tick every `check_interval` until `shutdown` resolves.
    ///
    /// Shutdown is only observed between ticks; a restart in progress runs to
    /// completion unless the process itself is killed.
    pub async fn run<F>(mut self, shutdown: F) -> MonitorSession
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        self.session.is_monitoring = true;
        log::info!(
            "Health monitor started (interval {}s, threshold {}, cooldown {}s)",
            self.settings.check_interval.as_secs(),
            self.settings.max_consecutive_failures,
            self.settings.restart_cooldown.as_secs()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, stopping health monitor");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }

        self.session.is_monitoring = false;
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::pidfile::PidFile;
    use crate::testing::FakeHost;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_millis(5),
            max_consecutive_failures: 3,
            restart_cooldown: Duration::from_secs(300),
            healthy_log_interval: Duration::from_secs(300),
            health_path: "/api/health".to_string(),
        }
    }

    fn monitor(host: &FakeHost, dir: &tempfile::TempDir) -> HealthMonitor {
        let cfg = OrchestratorConfig {
            service_name: "tokens".to_string(),
            port: 3000,
            health_path: "/api/health/public".to_string(),
            http_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            stop_attempts: 5,
            start_attempts: 5,
            settle_delay: Duration::from_millis(1),
        };
        let orch = RestartOrchestrator::new(
            cfg,
            host.controller(),
            host.ports(),
            host.health(),
            PidFile::new(dir.path().join("app.pid")),
        );
        HealthMonitor::new(settings(), orch)
    }

    /// Every healthy/unhealthy sequence of length 10.
    fn all_sequences() -> impl Iterator<Item = Vec<bool>> {
        (0u32..1 << 10).map(|bits| (0..10).map(|i| bits & (1 << i) != 0).collect())
    }

    #[test]
    fn failures_never_exceed_threshold_and_reset_after_health_or_restart() {
        let s = settings();
        for seq in all_sequences() {
            let start = Instant::now();
            let mut session = MonitorSession::default();
            for (i, healthy) in seq.iter().enumerate() {
                // Far enough apart that cooldown never interferes.
                let now = start + s.restart_cooldown * (i as u32 + 1);
                let decision = session.record(*healthy, now, &s);
                assert!(session.consecutive_failures < s.max_consecutive_failures);
                match decision {
                    Decision::Healthy { .. } | Decision::Restart => {
                        assert_eq!(session.consecutive_failures, 0)
                    }
                    Decision::Wait { failures } => {
                        assert_eq!(failures, session.consecutive_failures)
                    }
                    Decision::Cooldown { .. } => panic!("cooldown cannot apply here: {seq:?}"),
                }
            }
        }
    }

    #[test]
    fn no_restart_inside_cooldown_regardless_of_failures() {
        let s = settings();
        let start = Instant::now();
        let mut session = MonitorSession {
            last_restart: Some(start),
            ..MonitorSession::default()
        };
        for i in 1..50u32 {
            let now = start + Duration::from_secs(u64::from(i));
            assert_ne!(session.record(false, now, &s), Decision::Restart);
            assert!(session.consecutive_failures <= s.max_consecutive_failures);
        }
        assert_eq!(session.last_restart, Some(start));

        let after = start + s.restart_cooldown;
        assert_eq!(session.record(false, after, &s), Decision::Restart);
    }

    #[test]
    fn routine_healthy_log_is_rate_limited() {
        let s = settings();
        let start = Instant::now();
        let mut session = MonitorSession::default();

        let logs: Vec<bool> = [0u64, 30, 60, 299, 300, 330]
            .iter()
            .map(|secs| {
                match session.record(true, start + Duration::from_secs(*secs), &s) {
                    Decision::Healthy { log_routine, .. } => log_routine,
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();
        assert_eq!(logs, vec![true, false, false, false, true, false]);
    }

    #[tokio::test]
    async fn three_failures_trigger_exactly_one_restart() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        host.with(|s| s.healthy = false);
        let mut mon = monitor(&host, &dir);
        let t0 = Instant::now();

        assert_eq!(
            mon.tick(t0).await,
            TickOutcome::Degraded { failures: 1 }
        );
        assert_eq!(
            mon.tick(t0 + Duration::from_secs(30)).await,
            TickOutcome::Degraded { failures: 2 }
        );
        assert_eq!(host.snapshot().stop_calls, 0);

        let third = t0 + Duration::from_secs(60);
        let outcome = mon.tick(third).await;
        assert!(matches!(outcome, TickOutcome::Restarted(_)), "{outcome:?}");

        let s = host.snapshot();
        assert_eq!((s.stop_calls, s.start_calls), (1, 1));
        assert_eq!(mon.session().last_restart, Some(third));
        assert_eq!(mon.session().consecutive_failures, 0);
        assert!(!mon.session().is_restarting);
    }

    #[tokio::test]
    async fn second_restart_within_cooldown_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        host.with(|s| {
            s.healthy = false;
            s.healthy_after_start = false;
        });
        let mut mon = monitor(&host, &dir);
        let t0 = Instant::now();

        for i in 0..3u64 {
            mon.tick(t0 + Duration::from_secs(i * 30)).await;
        }
        // Restart attempted but the app never became healthy.
        assert_eq!(host.snapshot().stop_calls, 1);
        assert_eq!(mon.session().consecutive_failures, 0);

        let mut outcomes = Vec::new();
        for i in 3..6u64 {
            outcomes.push(mon.tick(t0 + Duration::from_secs(i * 30)).await);
        }
        assert!(matches!(
            outcomes.last(),
            Some(TickOutcome::CooldownSuppressed { .. })
        ));

        let s = host.snapshot();
        assert_eq!(s.stop_calls, 1, "no OS stop re-issued during cooldown");
        assert_eq!(s.start_calls, 1, "no OS start re-issued during cooldown");
    }

    #[tokio::test]
    async fn failed_restart_is_reported_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        host.with(|s| {
            s.healthy = false;
            s.stop_hangs = true;
        });
        let mut mon = monitor(&host, &dir);
        let t0 = Instant::now();

        mon.tick(t0).await;
        mon.tick(t0).await;
        let outcome = mon.tick(t0).await;
        assert!(
            matches!(&outcome, TickOutcome::RestartFailed(msg) if msg.contains("did not stop in time")),
            "{outcome:?}"
        );
        assert_eq!(mon.session().consecutive_failures, 0);
        assert_eq!(host.snapshot().start_calls, 0);
    }

    #[tokio::test]
    async fn healthy_tick_resets_failures() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        host.with(|s| s.healthy = false);
        let mut mon = monitor(&host, &dir);
        let t0 = Instant::now();

        mon.tick(t0).await;
        mon.tick(t0).await;
        assert_eq!(mon.session().consecutive_failures, 2);

        host.with(|s| s.healthy = true);
        assert_eq!(mon.tick(t0).await, TickOutcome::Healthy);
        assert_eq!(mon.session().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn tick_is_skipped_while_restarting() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        let mut mon = monitor(&host, &dir);
        mon.session.is_restarting = true;

        assert_eq!(mon.tick(Instant::now()).await, TickOutcome::Skipped);
        assert_eq!(host.snapshot().health_checks, 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::running_healthy(700);
        let mon = monitor(&host, &dir);

        let session = mon
            .run(tokio::time::sleep(Duration::from_millis(30)))
            .await;

        assert!(!session.is_monitoring);
        assert!(host.snapshot().health_checks >= 1);
    }
}
