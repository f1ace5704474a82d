//! Diagnostic output for the binary.

use crate::config::LogLevel;
use log::Level;
use std::io::Write;

/// Label printed between brackets in front of a message.
pub fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Installs the process-wide logger.
///
/// Messages go to stderr as `[LEVEL] message`. The threshold comes from
/// `level`; `RUST_LOG`, when set, takes precedence. Calling this twice is
/// harmless: the second logger is silently discarded.
pub fn init_logging(level: LogLevel) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format(|buf, record| writeln!(buf, "[{}] {}", level_label(record.level()), record.args()));

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(level_label(Level::Warn), "WARNING");
        assert_eq!(level_label(Level::Error), "ERROR");
        assert_eq!(level_label(Level::Trace), "TRACE");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogLevel::Warning);
        init_logging(LogLevel::Debug);
    }
}
