//! Structured logging for the `greenhouse` binary.
//!
//! Grounded on `horus_library`'s own logging setup, which uses the `log`
//! facade with a colored terminal writer rather than pulling in a full
//! tracing stack. Installed once at process start via [`init`]; every
//! `log::info!`/`log::warn!`/etc. call anywhere in `greenhouse-core` or
//! `greenhouse` is colorized to the terminal and also folded into C6's
//! message ring via
//! [`MessageLog::record_from_log_crate`][greenhouse_core::message_log::MessageLog::record_from_log_crate],
//! which never calls back into the `log` crate: C6's own `handle()` does
//! that only for messages explicitly routed with `Method.serial`, and this
//! bridge must not recurse into it.

use colored::Colorize;
use greenhouse_core::message_log::{Level as RingLevel, MessageLog};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::Arc;

struct Bridge {
    ring: Arc<MessageLog>,
    filter: LevelFilter,
}

fn ring_level(level: Level) -> RingLevel {
    match level {
        Level::Error => RingLevel::Error,
        Level::Warn => RingLevel::Warning,
        Level::Info => RingLevel::Info,
        Level::Debug | Level::Trace => RingLevel::Debug,
    }
}

fn colorize(level: Level, line: &str) -> String {
    match level {
        Level::Error => line.red().bold().to_string(),
        Level::Warn => line.yellow().to_string(),
        Level::Info => line.green().to_string(),
        Level::Debug => line.cyan().to_string(),
        Level::Trace => line.normal().to_string(),
    }
}

impl Log for Bridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record.target();
        let line = format!("[{:<5} {target}] {}", record.level(), record.args());
        println!("{}", colorize(record.level(), &line));
        self.ring.record_from_log_crate(ring_level(record.level()), target, &record.args().to_string());
    }

    fn flush(&self) {}
}

/// Installs the global logger. Must be called exactly once, before any
/// other task logs (`main` does this immediately after parsing config).
pub fn init(ring: Arc<MessageLog>, filter: LevelFilter) {
    let bridge = Bridge { ring, filter };
    log::set_max_level(filter);
    if log::set_boxed_logger(Box::new(bridge)).is_err() {
        eprintln!("(LOGGING) logger already installed, ignoring second init() call");
    }
}
