//! `log` backend writing colored records to stderr.

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

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
        let mut stderr = StandardStream::stderr(ColorChoice::Auto);
        let _ = stderr.set_color(&level_color(record.level()));
        let _ = write!(stderr, "[{:5}]", record.level());
        let _ = stderr.reset();
        let _ = writeln!(stderr, " {}: {}", record.target(), record.args());
    }

    fn flush(&self) {}
}

fn level_color(level: Level) -> ColorSpec {
    let mut spec = ColorSpec::new();
    match level {
        Level::Error => spec.set_fg(Some(Color::Red)).set_bold(true),
        Level::Warn => spec.set_fg(Some(Color::Yellow)).set_bold(true),
        Level::Info => spec.set_fg(Some(Color::Green)),
        Level::Debug => spec.set_fg(Some(Color::Cyan)),
        Level::Trace => spec.set_dimmed(true),
    };
    spec
}

/// Maps the number of `-v` flags to a level. Warnings are always shown.
pub fn level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_filter(verbosity));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_filter(0), LevelFilter::Warn);
        assert_eq!(level_filter(1), LevelFilter::Info);
        assert_eq!(level_filter(2), LevelFilter::Debug);
        assert_eq!(level_filter(3), LevelFilter::Trace);
        assert_eq!(level_filter(200), LevelFilter::Trace);
    }

    #[test]
    fn error_color_is_bold_red() {
        let spec = level_color(Level::Error);
        assert_eq!(spec.fg(), Some(&Color::Red));
        assert!(spec.bold());
        assert_eq!(level_color(Level::Info).fg(), Some(&Color::Green));
    }
}
