//! Minimal stderr logger. Not `env_logger`: this crate's only output target
//! is a terminal, so a hand-rolled `log::Log` keeps the dependency list
//! aligned with the rest of the workspace instead of pulling in a formatter
//! this CLI doesn't need.

use log::{LevelFilter, Log, Metadata, Record};

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
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the logger and set its level filter. Call once at startup.
pub fn init(level: LevelFilter) {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .expect("logger already initialized");
}
