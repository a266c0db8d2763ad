//! Console + file logging on top of `env_logger`.
//!
//! Every line is `[<RFC 3339 timestamp>] [<LEVEL>] <message>`, written to stderr
//! and appended to the component's log file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Render one log line (without the trailing newline).
pub fn format_line(ts: DateTime<Utc>, level: log::Level, message: &std::fmt::Arguments<'_>) -> String {
    format!(
        "[{}] [{}] {}",
        ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        message
    )
}

/// Duplicates every write to stderr and, when present, an append-mode file.
struct Tee {
    file: Option<File>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // A full disk must not take the console output down with it.
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn builder(file: Option<File>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "{}", format_line(Utc::now(), record.level(), record.args()))
        })
        .target(env_logger::Target::Pipe(Box::new(Tee { file })));
    builder
}

/// Log to stderr and append to `log_file`, creating its directory if needed.
pub fn init(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    builder(Some(file))
        .try_init()
        .context("Logger already initialised")?;
    Ok(())
}

/// Stderr-only logging, used when the log file cannot be opened.
pub fn init_console() {
    let _ = builder(None).try_init();
}

/// Route panics through the logger so a dying monitor leaves a trace in its log file.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("FATAL: {info}");
        log::logger().flush();
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let line = format_line(ts, log::Level::Warn, &format_args!("port {} busy", 3000));
        assert_eq!(line, "[2026-10-19T08:30:00.000Z] [WARN] port 3000 busy");
    }
}
