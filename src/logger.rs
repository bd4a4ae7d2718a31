//! Stderr backend for the `log` facade.
//!
//! Lines look like `2025-06-01 12:00:00.123 WARN rcdrive::dispatch: udp: dropped 8 byte frame`.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

pub const LEVEL_ENV: &str = "RCDRIVE_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            &Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            record.level(),
            record.target(),
            record.args(),
        );
        // write errors are ignored
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn format_line(
    timestamp: &str,
    level: log::Level,
    tag: &str,
    message: &std::fmt::Arguments,
) -> String {
    format!("{} {:<5} {}: {}\n", timestamp, level, tag, message)
}

/// Parses a level name, case-insensitively. `None` for anything unknown.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

/// `RCDRIVE_LOG` wins over the configured level; unparseable values fall back to `info`.
pub fn resolve_level(configured: &str, env: Option<&str>) -> LevelFilter {
    env.and_then(parse_level)
        .or_else(|| parse_level(configured))
        .unwrap_or(LevelFilter::Info)
}

pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn line_layout() {
        let line = format_line(
            "2025-01-01 00:00:00.000",
            Level::Warn,
            "rcdrive::udp",
            &format_args!("dropped {} bytes", 3),
        );
        assert_eq!(line, "2025-01-01 00:00:00.000 WARN  rcdrive::udp: dropped 3 bytes\n");
    }

    #[test]
    fn level_resolution() {
        assert_eq!(resolve_level("debug", None), LevelFilter::Debug);
        assert_eq!(resolve_level("WARN", None), LevelFilter::Warn);
        assert_eq!(resolve_level("info", Some("trace")), LevelFilter::Trace);
        assert_eq!(resolve_level("error", Some("bogus")), LevelFilter::Error);
        assert_eq!(resolve_level("bogus", None), LevelFilter::Info);
        assert_eq!(resolve_level("off", None), LevelFilter::Off);
    }
}
