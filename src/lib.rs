//! Health monitor and self-healing supervisor for a single OS-managed service.

pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod health;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod pidfile;
pub mod privilege;
pub mod probe;
pub mod state;
pub mod task;

#[cfg(test)]
mod testing;
