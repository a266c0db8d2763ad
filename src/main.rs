mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use svcguard::command::SystemRunner;
use svcguard::config::MonitorConfig;
use svcguard::logging;
use svcguard::monitor::{HealthMonitor, MonitorSettings};
use svcguard::orchestrator::RestartOrchestrator;
use svcguard::privilege;
use svcguard::task::{self, TaskInstaller, TaskSpec};

use cli::Cmd;

fn main() {
    let args = cli::Args::parse();

    let cfg_path = match args.config.clone() {
        Some(path) => path,
        None => match MonitorConfig::default_path() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("FATAL: {e:#}");
                std::process::exit(1);
            }
        },
    };
    let created = match MonitorConfig::create_default(&cfg_path) {
        Ok(created) => created,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            std::process::exit(1);
        }
    };
    let cfg = match MonitorConfig::load(&cfg_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            std::process::exit(1);
        }
    };

    let log_path = cfg.log_path(args.sub.log_file());
    if let Err(e) = logging::init(&log_path) {
        logging::init_console();
        log::warn!("File logging disabled: {e:#}");
    }
    logging::install_panic_hook();
    if created {
        info!("Created default configuration at {}", cfg_path.display());
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    let code = match rt.block_on(real_main(args.sub, &cfg, &cfg_path)) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    log::logger().flush();
    std::process::exit(code);
}

/// Runs one command; `Ok(false)` means it ran but the answer is negative
/// (service not running, endpoint unhealthy, task missing).
async fn real_main(cmd: Cmd, cfg: &MonitorConfig, cfg_path: &Path) -> Result<bool> {
    info!("Using config from: {}", cfg_path.display());

    if cmd.needs_elevation() {
        privilege::require_elevated(&format!("{cmd:?}").to_lowercase())?;
    }

    match cmd {
        Cmd::Start => {
            let mut orch = RestartOrchestrator::for_host(cfg);
            orch.start_service()
                .await
                .with_context(|| format!("Failed to start {}", cfg.service_name))?;
            println!("{}", orch.status().await);
            Ok(true)
        }
        Cmd::Stop => {
            let mut orch = RestartOrchestrator::for_host(cfg);
            orch.stop_service()
                .await
                .with_context(|| format!("Failed to stop {}", cfg.service_name))?;
            println!("{}", orch.status().await);
            Ok(true)
        }
        Cmd::Restart => {
            let mut orch = RestartOrchestrator::for_host(cfg);
            let snapshot = orch
                .restart()
                .await
                .with_context(|| format!("Failed to restart {}", cfg.service_name))?;
            println!("{snapshot}");
            Ok(true)
        }
        Cmd::Status { json } => {
            let snapshot = RestartOrchestrator::for_host(cfg).status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}: {snapshot}", cfg.service_name);
            }
            Ok(snapshot.state.is_running())
        }
        Cmd::Check { json } => {
            let monitor =
                HealthMonitor::new(MonitorSettings::from(cfg), RestartOrchestrator::for_host(cfg));
            let result = monitor.check_once().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{}: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" },
                    result.reason
                );
            }
            Ok(result.healthy)
        }
        Cmd::Monitor => {
            info!("svcguard monitor started (pid {})", std::process::id());
            let monitor =
                HealthMonitor::new(MonitorSettings::from(cfg), RestartOrchestrator::for_host(cfg));
            let session = monitor.run(shutdown_signal()).await;
            info!(
                "svcguard monitor exiting ({} consecutive failure(s) at shutdown)",
                session.consecutive_failures
            );
            Ok(true)
        }
        Cmd::Install => {
            let installer = host_installer(cfg, cfg_path)?;
            installer
                .install()
                .await
                .context("Failed to install monitor task")?;
            println!("Installed task {}", cfg.task_name);
            Ok(true)
        }
        Cmd::Uninstall => {
            let installer = host_installer(cfg, cfg_path)?;
            installer
                .uninstall()
                .await
                .context("Failed to remove monitor task")?;
            println!("Removed task {}", cfg.task_name);
            Ok(true)
        }
        Cmd::Verify => {
            let installer = host_installer(cfg, cfg_path)?;
            let report = task::verify(&cfg.task_name, installer.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.exists)
        }
    }
}

fn host_installer(cfg: &MonitorConfig, cfg_path: &Path) -> Result<Box<dyn TaskInstaller>> {
    Ok(task::platform_installer(
        monitor_task(cfg, cfg_path)?,
        Arc::new(SystemRunner),
    ))
}

fn monitor_task(cfg: &MonitorConfig, cfg_path: &Path) -> Result<TaskSpec> {
    // The task runs without our working directory, so pin the config by absolute path.
    let cfg_path: PathBuf = std::path::absolute(cfg_path)
        .with_context(|| format!("Failed to resolve {}", cfg_path.display()))?;
    TaskSpec::monitor_task(&cfg.task_name, &cfg.service_name, cfg_path)
        .context("Failed to locate the svcguard executable")
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
