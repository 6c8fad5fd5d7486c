//! Multi-owner relay arbitration with forced-off override and a daily
//! time-of-day scheduler (C7).
//!
//! Grounded on `original_source/GHS/include/Peripherals/Relay.hpp` and
//! `src/Peripherals/Relay.cpp`. Up to [`MAX_CLIENTS`] logical subscribers
//! can each request a relay on/off; the relay is physically energized iff
//! its state is `On` and at least one client is in the `On` state. A
//! `force_off` overrides all client state and de-energizes immediately;
//! `remove_force` only lifts the override, it never re-energizes by itself.

use crate::clock::WallTime;
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::sync::BoundedMutex;

pub const MAX_CLIENTS: usize = 10;
pub const MAX_CALLER_TAG_LEN: usize = 15;
/// Sentinel disabling a timer edge, mirroring the original's
/// `RELAY_TIMER_OFF` wire-format value. Internally the timer is modeled as
/// `Option<u32>` instead; this constant only matters at the persistence
/// boundary (C13).
pub const TIMER_OFF: u32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Off,
    On,
    ForcedOff,
    /// The force-off override was lifted. Distinct from `Off`: a client left
    /// `On` under the force does not re-energize the relay in this state,
    /// only a fresh `request_on` does.
    ForceRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Available,
    Reserved,
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(pub usize);

#[derive(Debug, Clone, Copy)]
struct Client {
    state: ClientState,
}

/// Per-relay daily on/off scheduler. `weekdays` bit0 = Sunday .. bit6 =
/// Saturday, matching the original's weekday mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    pub on_time: Option<u32>,
    pub off_time: Option<u32>,
    pub weekdays: u8,
}

impl Timer {
    pub fn ready(&self) -> bool {
        match (self.on_time, self.off_time) {
            (Some(on), Some(off)) => on != off,
            _ => false,
        }
    }

    /// True if `sec` falls within the configured on-window, honoring a
    /// midnight-crossing timer (`off_time < on_time`).
    fn is_on_at(&self, sec: u32) -> bool {
        let (Some(on), Some(off)) = (self.on_time, self.off_time) else {
            return false;
        };
        if on < off {
            sec >= on && sec < off
        } else if on > off {
            sec >= on || sec < off
        } else {
            false
        }
    }

    fn weekday_bit_set(&self, weekday: u8) -> bool {
        (self.weekdays >> weekday) & 1 == 1
    }
}

struct State {
    clients: [Client; MAX_CLIENTS],
    caller_tags: [String; MAX_CLIENTS],
    relay_state: RelayState,
    timer: Timer,
    physically_on: bool,
    driver: Box<dyn RelayDriver>,
}

/// A single relay. Physical actuation is delegated to a [`RelayDriver`]
/// (the GPIO collaborator, §6.1) so this type stays testable without
/// hardware. The driver lives inside the same bounded mutex as the rest of
/// the relay's state, so actuation and bookkeeping always update together.
pub struct Relay {
    index: u8,
    tag: &'static str,
    state: BoundedMutex<State>,
}

/// The physical actuation boundary: device-specific register layouts are
/// not this crate's concern, only the digital GPIO relay driver contract.
pub trait RelayDriver: Send {
    fn energize(&mut self, relay_index: u8, on: bool) -> GreenhouseResult<()>;
}

impl Relay {
    pub fn new(index: u8, tag: &'static str, driver: Box<dyn RelayDriver>) -> Self {
        Self {
            index,
            tag,
            state: BoundedMutex::new(
                tag,
                State {
                    clients: [Client { state: ClientState::Available }; MAX_CLIENTS],
                    caller_tags: std::array::from_fn(|_| String::new()),
                    relay_state: RelayState::Off,
                    timer: Timer::default(),
                    physically_on: false,
                    driver,
                },
            ),
        }
    }

    /// Reserves the next available client slot, truncating `caller_tag`.
    pub fn acquire(&self, caller_tag: &str) -> GreenhouseResult<ClientId> {
        let mut state = self.state.lock()?;
        let idx = state
            .clients
            .iter()
            .position(|c| c.state == ClientState::Available)
            .ok_or_else(|| GreenhouseError::relay(format!("{} has no free client slots", self.tag)))?;
        state.clients[idx].state = ClientState::Reserved;
        state.caller_tags[idx] = caller_tag.chars().take(MAX_CALLER_TAG_LEN).collect();
        Ok(ClientId(idx))
    }

    fn client_mut<'a>(&self, state: &'a mut State, id: ClientId) -> GreenhouseResult<&'a mut Client> {
        state
            .clients
            .get_mut(id.0)
            .ok_or_else(|| GreenhouseError::not_found(format!("relay client {}", id.0)))
    }

    /// No-op (but `ok`) while `ForcedOff` is active. Otherwise moves the
    /// client to `On`; if the relay wasn't physically energized, does so.
    pub fn request_on(&self, id: ClientId) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        if state.relay_state == RelayState::ForcedOff {
            return Ok(());
        }
        self.client_mut(&mut state, id)?.state = ClientState::On;
        state.relay_state = RelayState::On;
        self.sync_physical(&mut state)
    }

    /// Moves the client to `Off` (then frees the slot). If no client
    /// remains `On`, de-energizes.
    pub fn request_off(&self, id: ClientId) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        self.client_mut(&mut state, id)?.state = ClientState::Off;
        state.clients[id.0].state = ClientState::Available;
        if state.relay_state != RelayState::ForcedOff && !state.clients.iter().any(|c| c.state == ClientState::On) {
            state.relay_state = RelayState::Off;
        }
        self.sync_physical(&mut state)
    }

    pub fn force_off(&self) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.relay_state = RelayState::ForcedOff;
        log::warn!("{} forced off", self.tag);
        self.sync_physical(&mut state)
    }

    /// Clears the force-off block. Does not itself re-energize, even if a
    /// client was left `On` under the force; only a subsequent `request_on`
    /// does. Client states are left untouched.
    pub fn remove_force(&self) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        if state.relay_state == RelayState::ForcedOff {
            state.relay_state = RelayState::ForceRemoved;
            log::info!("{} force removed", self.tag);
        }
        self.sync_physical(&mut state)
    }

    pub fn state(&self) -> RelayState {
        self.state.lock().map(|s| s.relay_state).unwrap_or(RelayState::Off)
    }

    pub fn physically_on(&self) -> bool {
        self.state.lock().map(|s| s.physically_on).unwrap_or(false)
    }

    /// Tags of clients currently holding an `On` reservation, for
    /// diagnostics (the report/HTTP layer, out of scope here, surfaces
    /// this to explain why a relay won't de-energize).
    pub fn active_client_tags(&self) -> Vec<String> {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        state
            .clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state == ClientState::On)
            .map(|(i, _)| state.caller_tags[i].clone())
            .collect()
    }

    fn sync_physical(&self, state: &mut State) -> GreenhouseResult<()> {
        let should_be_on = state.relay_state == RelayState::On
            && state.clients.iter().any(|c| c.state == ClientState::On);
        if should_be_on != state.physically_on {
            // Physical write errors are logged and retried on the next
            // manage cycle rather than propagated as a hard failure.
            match state.driver.energize(self.index, should_be_on) {
                Ok(()) => state.physically_on = should_be_on,
                Err(e) => log::error!("{} failed to energize({should_be_on}): {e}", self.tag),
            }
        }
        Ok(())
    }

    pub fn set_timer(&self, on_time: Option<u32>, off_time: Option<u32>, weekdays: u8) -> GreenhouseResult<()> {
        if let Some(t) = on_time {
            if t >= crate::clock::SECONDS_PER_DAY {
                return Err(GreenhouseError::invalid_input("on_time out of range"));
            }
        }
        if let Some(t) = off_time {
            if t >= crate::clock::SECONDS_PER_DAY {
                return Err(GreenhouseError::invalid_input("off_time out of range"));
            }
        }
        let mut state = self.state.lock()?;
        state.timer = Timer { on_time, off_time, weekdays };
        Ok(())
    }

    pub fn timer(&self) -> Timer {
        self.state.lock().map(|s| s.timer).unwrap_or_default()
    }

    /// Evaluated once per second by the routine task (C14). Requests
    /// on/off per the configured daily window, including across midnight.
    pub fn manage_timer(&self, now: WallTime, weekday: u8, scheduler_client: ClientId) -> GreenhouseResult<()> {
        let timer = self.timer();
        if !timer.ready() || !timer.weekday_bit_set(weekday) {
            return Ok(());
        }
        if timer.is_on_at(now.seconds_of_day) {
            self.request_on(scheduler_client)
        } else {
            self.request_off(scheduler_client)
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}
