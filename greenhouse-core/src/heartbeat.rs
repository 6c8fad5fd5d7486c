//! Software heartbeat / watchdog supervisor (C5).
//!
//! Grounded on `original_source/GHS/include/Common/heartbeat.hpp` and
//! `src/Common/heartbeat.cpp`: a fixed array of client slots, each
//! decremented once per second by [`Heartbeat::manage`]; a slot that hits
//! zero without a [`Heartbeat::roger_up`] increments a failure counter, and
//! `HEARTBEAT_RESET_FAILS` consecutive failures trigger save-and-restart.

use crate::collaborators::StationDetails;
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::sync::BoundedMutex;
use std::net::UdpSocket;
use std::sync::Arc;

pub const MAX_SLOTS: usize = 32;
pub const MAX_TAG_LEN: usize = 15;
pub const HEARTBEAT_RESET_FAILS: u8 = 3;

/// Asked to persist all settings and restart the process. Implemented by
/// C13's settings saver; kept as a trait here so C5 doesn't depend on C13
/// directly (breaks what would otherwise be a cyclic module dependency).
pub trait RestartHandler: Send + Sync {
    fn save_and_restart(&self);
}

#[derive(Debug, Clone)]
struct Slot {
    caller_tag: String,
    remaining_seconds: u8,
    failure_count: u8,
    suspended: bool,
    registered: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            caller_tag: String::new(),
            remaining_seconds: 0,
            failure_count: 0,
            suspended: false,
            registered: false,
        }
    }
}

struct State {
    slots: Vec<Slot>,
    all_suspended: bool,
}

/// A registered watchdog slot handle. Copy-able; just an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub usize);

pub struct Heartbeat {
    state: BoundedMutex<State>,
    restart_handler: Arc<dyn RestartHandler>,
}

impl Heartbeat {
    pub fn new(restart_handler: Arc<dyn RestartHandler>) -> Self {
        Self {
            state: BoundedMutex::new(
                "heartbeat",
                State {
                    slots: vec![Slot::empty(); MAX_SLOTS],
                    all_suspended: false,
                },
            ),
            restart_handler,
        }
    }

    /// Allocates the next free slot, truncating `caller_tag` to
    /// [`MAX_TAG_LEN`] characters as the original does.
    pub fn register(&self, caller_tag: &str, initial_seconds: u8) -> GreenhouseResult<SlotId> {
        let mut state = self.state.lock()?;
        let idx = state
            .slots
            .iter()
            .position(|s| !s.registered)
            .ok_or_else(|| GreenhouseError::Heartbeat("no free heartbeat slots".into()))?;
        let tag: String = caller_tag.chars().take(MAX_TAG_LEN).collect();
        state.slots[idx] = Slot {
            caller_tag: tag,
            remaining_seconds: initial_seconds,
            failure_count: 0,
            suspended: false,
            registered: true,
        };
        Ok(SlotId(idx))
    }

    /// Resets the countdown. `reset_seconds` is clamped into `1..=255`.
    pub fn roger_up(&self, id: SlotId, reset_seconds: u8) -> GreenhouseResult<()> {
        let reset_seconds = reset_seconds.max(1);
        let mut state = self.state.lock()?;
        let slot = state
            .slots
            .get_mut(id.0)
            .filter(|s| s.registered)
            .ok_or_else(|| GreenhouseError::not_found(format!("heartbeat slot {}", id.0)))?;
        slot.remaining_seconds = reset_seconds;
        Ok(())
    }

    pub fn suspend(&self, id: SlotId) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        if let Some(slot) = state.slots.get_mut(id.0).filter(|s| s.registered) {
            slot.suspended = true;
        }
        Ok(())
    }

    /// Releases a single slot's suspension, extending its remaining budget
    /// by a small grace period to absorb the sync gap the caller may have
    /// accumulated while suspended.
    pub fn release(&self, id: SlotId) -> GreenhouseResult<()> {
        const RELEASE_GRACE_SECONDS: u8 = 2;
        let mut state = self.state.lock()?;
        if let Some(slot) = state.slots.get_mut(id.0).filter(|s| s.registered) {
            slot.suspended = false;
            slot.remaining_seconds = slot.remaining_seconds.saturating_add(RELEASE_GRACE_SECONDS);
        }
        Ok(())
    }

    pub fn suspend_all(&self) -> GreenhouseResult<()> {
        self.state.lock()?.all_suspended = true;
        Ok(())
    }

    pub fn release_all(&self) -> GreenhouseResult<()> {
        const RELEASE_GRACE_SECONDS: u8 = 2;
        let mut state = self.state.lock()?;
        state.all_suspended = false;
        for slot in state.slots.iter_mut().filter(|s| s.registered) {
            slot.remaining_seconds = slot.remaining_seconds.saturating_add(RELEASE_GRACE_SECONDS);
        }
        Ok(())
    }

    /// Runs exactly once per second. Decrements every non-suspended
    /// registered slot; a slot that was already at zero logs CRITICAL and
    /// increments its failure count instead. `HEARTBEAT_RESET_FAILS`
    /// consecutive failures on any slot triggers save-and-restart.
    pub fn manage(&self) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        if state.all_suspended {
            return Ok(());
        }
        let mut should_restart = false;
        for (idx, slot) in state.slots.iter_mut().enumerate() {
            if !slot.registered || slot.suspended {
                continue;
            }
            if slot.remaining_seconds == 0 {
                log::error!(
                    "(Heartbeat) slot {idx} caller '{}' unresponsive",
                    slot.caller_tag
                );
                slot.failure_count = slot.failure_count.saturating_add(1);
                if slot.failure_count >= HEARTBEAT_RESET_FAILS {
                    should_restart = true;
                }
            } else {
                slot.remaining_seconds -= 1;
                slot.failure_count = 0;
            }
        }
        drop(state);
        if should_restart {
            self.restart_handler.save_and_restart();
        }
        Ok(())
    }

    /// Best-effort UDP liveness ping (§4.4, §6.3): one fire-and-forget
    /// datagram per second carrying `{"mdns","rssi","mem"}`, matching the
    /// original's `pingServer`. A remote collector uses these to keep
    /// devices "alive" in its own view independent of this process's own
    /// heartbeat supervisor; failures here are silent by design (no log,
    /// no retry; the original's `sendto` return value is discarded too).
    pub fn ping_remote(&self, udp_target: &str, details: &StationDetails) {
        let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else { return };
        let payload = serde_json::json!({
            "mdns": details.mdns,
            "rssi": details.rssi.to_string(),
            "mem": details.heap_free.to_string(),
        });
        let Ok(body) = serde_json::to_vec(&payload) else { return };
        let _ = socket.send_to(&body, udp_target);
    }

    #[cfg(test)]
    fn failure_count(&self, id: SlotId) -> u8 {
        self.state.lock().unwrap().slots[id.0].failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRestart(AtomicUsize);
    impl RestartHandler for CountingRestart {
        fn save_and_restart(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn restart_triggers_after_reset_fails_consecutive_expiries() {
        let restarts = Arc::new(CountingRestart(AtomicUsize::new(0)));
        let hb = Heartbeat::new(restarts.clone());
        let id = hb.register("task", 3).unwrap();

        // Ticks 1-3 decrement 3 -> 2 -> 1 -> 0, no failures yet.
        for _ in 0..3 {
            hb.manage().unwrap();
        }
        assert_eq!(hb.failure_count(id), 0);

        // Tick 4: remaining_seconds is 0, first failure.
        hb.manage().unwrap();
        assert_eq!(hb.failure_count(id), 1);
        assert_eq!(restarts.0.load(Ordering::SeqCst), 0);

        // Tick 5: second failure.
        hb.manage().unwrap();
        assert_eq!(hb.failure_count(id), 2);
        assert_eq!(restarts.0.load(Ordering::SeqCst), 0);

        // Tick 6: third failure reaches HEARTBEAT_RESET_FAILS, restart fires.
        hb.manage().unwrap();
        assert_eq!(restarts.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn roger_up_resets_failure_count() {
        let restarts = Arc::new(CountingRestart(AtomicUsize::new(0)));
        let hb = Heartbeat::new(restarts);
        let id = hb.register("task", 1).unwrap();
        hb.manage().unwrap(); // 1 -> 0
        hb.manage().unwrap(); // failure 1
        assert_eq!(hb.failure_count(id), 1);
        hb.roger_up(id, 5).unwrap();
        hb.manage().unwrap(); // 5 -> 4, failure reset
        assert_eq!(hb.failure_count(id), 0);
    }

    #[test]
    fn suspended_slot_is_skipped() {
        let restarts = Arc::new(CountingRestart(AtomicUsize::new(0)));
        let hb = Heartbeat::new(restarts);
        let id = hb.register("task", 0).unwrap();
        hb.suspend(id).unwrap();
        for _ in 0..10 {
            hb.manage().unwrap();
        }
        assert_eq!(hb.failure_count(id), 0);
    }

    #[test]
    fn ping_remote_does_not_panic_on_unreachable_target() {
        let restarts = Arc::new(CountingRestart(AtomicUsize::new(0)));
        let hb = Heartbeat::new(restarts);
        let details = StationDetails {
            ssid: "greenhouse".into(),
            ip: "192.0.2.1".into(),
            mdns: "greenhouse.local".into(),
            rssi: -55,
            heap_free: 123_456,
            status: "connected".into(),
        };
        // Port 0 on the loopback address never accepts a connect/send; this
        // only asserts the call is silent and infallible, not that delivery
        // happened.
        hb.ping_remote("127.0.0.1:0", &details);
    }

    #[test]
    fn full_registry_returns_error() {
        let restarts = Arc::new(CountingRestart(AtomicUsize::new(0)));
        let hb = Heartbeat::new(restarts);
        for i in 0..MAX_SLOTS {
            hb.register(&format!("task{i}"), 5).unwrap();
        }
        assert!(hb.register("overflow", 5).is_err());
    }
}
