//! Severity-tagged log ring and OLED-equivalent transient message (C6).
//!
//! Grounded on `original_source/GHS/include/UI/MsgLogHandler.hpp`: an
//! 8192-byte ring of `;`-delimited entries (`"LEVEL: <tag> msg"`, each
//! capped at 128 bytes), plus a single transient "display" message that
//! auto-clears after `msg_clear_seconds`. Every entry is also emitted
//! through the `log` crate at the matching level (§2 A2 of
//! `SPEC_FULL.md`) so a host operator sees normal process output in
//! addition to the in-core ring the HTTP/OLED layer (out of scope) reads
//! from.

use crate::clock::Clock;
use crate::sync::BoundedMutex;
use std::sync::Arc;

pub const LOG_SIZE: usize = 8192;
pub const LOG_MAX_ENTRY: usize = 128;
const DELIM: char = ';';
const DELIM_REPLACEMENT: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    fn emit_to_log_crate(&self, message: &str) {
        match self {
            Level::Debug => log::debug!("{message}"),
            Level::Info => log::info!("{message}"),
            Level::Warning => log::warn!("{message}"),
            Level::Error | Level::Critical => log::error!("{message}"),
        }
    }
}

/// Where a message can be routed: serial (the `log` crate), the in-core
/// ring, the transient display, or any combination; matching the
/// original's `Messaging::Method` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    pub serial: bool,
    pub display: bool,
    pub log: bool,
}

impl Method {
    pub const SERIAL: Method = Method { serial: true, display: false, log: false };
    pub const SERIAL_DISPLAY: Method = Method { serial: true, display: true, log: false };
    pub const SERIAL_LOG: Method = Method { serial: true, display: false, log: true };
    pub const DISPLAY: Method = Method { serial: false, display: true, log: false };
    pub const DISPLAY_LOG: Method = Method { serial: false, display: true, log: true };
    pub const LOG: Method = Method { serial: false, display: false, log: true };
    pub const ALL: Method = Method { serial: true, display: true, log: true };
}

struct State {
    ring: String,
    display_message: Option<String>,
    display_last_write_seconds: u64,
}

pub struct MessageLog {
    clock: Arc<Clock>,
    msg_clear_seconds: u64,
    state: BoundedMutex<State>,
}

impl MessageLog {
    pub fn new(clock: Arc<Clock>, msg_clear_seconds: u64) -> Self {
        Self {
            clock,
            msg_clear_seconds,
            state: BoundedMutex::new(
                "message_log",
                State {
                    ring: String::new(),
                    display_message: None,
                    display_last_write_seconds: 0,
                },
            ),
        }
    }

    /// Formats, rewrites any stray `;` to `:`, and routes `message` per
    /// `method`. Entries longer than [`LOG_MAX_ENTRY`] are truncated.
    pub fn handle(&self, level: Level, tag: &str, message: &str, method: Method) {
        let sanitized: String = message.chars().map(|c| if c == DELIM { DELIM_REPLACEMENT } else { c }).collect();
        let mut entry = format!("{}: {} {}", level.as_str(), tag, sanitized);
        if entry.len() > LOG_MAX_ENTRY {
            entry.truncate(LOG_MAX_ENTRY);
        }

        if method.serial {
            level.emit_to_log_crate(&entry);
        }
        if method.log {
            if let Ok(mut state) = self.state.lock() {
                Self::append_entry(&mut state.ring, &entry);
            }
        }
        if method.display {
            if let Ok(mut state) = self.state.lock() {
                state.display_message = Some(entry);
                state.display_last_write_seconds = self.clock.seconds();
            }
        }
    }

    /// Appends `entry` plus a delimiter, evicting the oldest whole entries
    /// from the front until the new one fits within [`LOG_SIZE`].
    fn append_entry(ring: &mut String, entry: &str) {
        let needed = entry.len() + 1; // +1 for the trailing delimiter
        while ring.len() + needed > LOG_SIZE {
            match ring.find(DELIM) {
                Some(pos) => {
                    ring.drain(..=pos);
                }
                None => {
                    ring.clear();
                    break;
                }
            }
        }
        ring.push_str(entry);
        ring.push(DELIM);
    }

    /// Ring-only ingestion for records that originated in the `log` crate
    /// itself (used by the binary's `log::Log` bridge). Unlike [`handle`],
    /// this never calls back into `log::debug!`/`log::info!`/etc.; doing
    /// so would recurse into the very logger that invoked it.
    pub fn record_from_log_crate(&self, level: Level, target: &str, message: &str) {
        let sanitized: String = message.chars().map(|c| if c == DELIM { DELIM_REPLACEMENT } else { c }).collect();
        let mut entry = format!("{}: ({target}) {sanitized}", level.as_str());
        if entry.len() > LOG_MAX_ENTRY {
            entry.truncate(LOG_MAX_ENTRY);
        }
        if let Ok(mut state) = self.state.lock() {
            Self::append_entry(&mut state.ring, &entry);
        }
    }

    /// Non-blocking check: clears the transient display message if
    /// `msg_clear_seconds` elapsed since its last write. Intended to be
    /// polled once per routine-task iteration (C14).
    pub fn display_message_check(&self) -> Option<String> {
        let mut state = self.state.lock().ok()?;
        if let Some(msg) = &state.display_message {
            if self.clock.seconds().saturating_sub(state.display_last_write_seconds) >= self.msg_clear_seconds {
                state.display_message = None;
                return None;
            }
            return Some(msg.clone());
        }
        None
    }

    pub fn snapshot(&self) -> String {
        self.state.lock().map(|s| s.ring.clone()).unwrap_or_default()
    }

    /// Returns up to `max_bytes` of the most recent log entries, cut at an
    /// entry boundary, for C13's save-and-restart log tail.
    pub fn tail(&self, max_bytes: usize) -> String {
        let ring = self.snapshot();
        if ring.len() <= max_bytes {
            return ring;
        }
        let start = ring.len() - max_bytes;
        match ring[start..].find(DELIM) {
            Some(pos) => ring[start + pos + 1..].to_string(),
            None => ring[start..].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> MessageLog {
        MessageLog::new(Arc::new(Clock::new()), 5)
    }

    #[test]
    fn semicolon_in_message_is_rewritten() {
        let l = log();
        l.handle(Level::Info, "(TEST)", "a;b;c", Method::LOG);
        assert!(l.snapshot().contains("a:b:c"));
        assert!(!l.snapshot().starts_with("INFO: (TEST) a;b"));
    }

    #[test]
    fn ring_evicts_oldest_whole_entries_when_full() {
        let l = log();
        // Fill with many short entries, then force eviction with a final
        // large write; the oldest entries must vanish as a whole unit.
        for i in 0..10 {
            l.handle(Level::Debug, "(T)", &format!("entry-{i}"), Method::LOG);
        }
        let before = l.snapshot();
        assert!(before.contains("entry-0"));

        let big = "x".repeat(LOG_MAX_ENTRY - 20);
        l.handle(Level::Debug, "(T)", &big, Method::LOG);
        let after = l.snapshot();
        assert!(after.len() <= LOG_SIZE);
        assert!(!after.contains("entry-0"), "oldest entry should have been evicted");
    }

    #[test]
    fn display_message_clears_after_timeout() {
        let l = MessageLog::new(Arc::new(Clock::new()), 0);
        l.handle(Level::Warning, "(T)", "transient", Method::DISPLAY);
        // msg_clear_seconds = 0 means it's immediately eligible for clearing
        // on the very next check.
        assert!(l.display_message_check().is_none());
    }

    #[test]
    fn display_message_persists_within_window() {
        let l = log();
        l.handle(Level::Warning, "(T)", "transient", Method::DISPLAY);
        assert_eq!(l.display_message_check().as_deref(), Some("WARNING: (T) transient"));
    }

    #[test]
    fn tail_cuts_at_entry_boundary() {
        let l = log();
        l.handle(Level::Info, "(T)", "first", Method::LOG);
        l.handle(Level::Info, "(T)", "second", Method::LOG);
        l.handle(Level::Info, "(T)", "third", Method::LOG);
        let tail = l.tail(12);
        // Should not contain a partial entry at the start.
        assert!(!tail.starts_with("rst")); // would be a mid-entry cut artifact
    }
}
