//! Temperature/humidity sensor task: read, average, bound-evaluate (C9).
//!
//! Grounded on `original_source/GHS/src/Peripherals/TempHum.cpp`: one SHT3x
//! read per iteration feeds a running average (`avg += (v - avg) / poll_ct`,
//! the incremental-mean form; the original's literal `avg += v; avg /=
//! poll_ct` is numerically equivalent but drifts under repeated division, so
//! this reimplementation uses the stable form), and two [`crate::bounds::Bound`]s
//! per channel (temp, humidity) each drive a relay and an alert.

use crate::alert::{AlertDispatch, SensDownPkg};
use crate::bounds::{Bound, Condition, Crossing};
use crate::collaborators::{ShtValues, TempHumDriver};
use crate::error::GreenhouseResult;
use crate::relay::{ClientId, Relay};
use crate::sync::BoundedMutex;
use std::sync::Arc;

pub const HYSTERESIS: f32 = 1.0;
pub const CONSEC_CTS: u32 = 5;
pub const ERR_CT_MAX: u32 = 3;

/// A bound that, once its consecutive-count gate opens, drives a relay.
pub struct RelayBound {
    pub bound: Bound,
    relay: Option<(Arc<Relay>, ClientId)>,
}

impl RelayBound {
    pub fn new() -> Self {
        Self {
            bound: Bound::new(Condition::None, 0.0, HYSTERESIS),
            relay: None,
        }
    }

    pub fn attach_relay(&mut self, relay: Arc<Relay>, client_id: ClientId) {
        self.relay = Some((relay, client_id));
    }

    pub fn detach_relay(&mut self) {
        self.relay = None;
    }

    /// Physical relay index this bound drives, if attached; used by C13
    /// to persist which relay a reboot should reattach to.
    fn relay_index(&self) -> Option<u8> {
        self.relay.as_ref().map(|(relay, _)| relay.index())
    }

    /// §4.5 relay handler: refuses to act when the condition is `None` or
    /// no relay is attached; the consecutive-count gate is enforced here via
    /// [`Bound::evaluate`]'s own counters.
    fn apply(&mut self, value: f32) -> GreenhouseResult<()> {
        if self.bound.condition == Condition::None {
            return Ok(());
        }
        let Some((relay, client_id)) = &self.relay else {
            return Ok(());
        };
        match self.bound.evaluate(value) {
            Crossing::Tripped { on_ct } if on_ct >= CONSEC_CTS => relay.request_on(*client_id),
            Crossing::Cleared { off_ct } if off_ct >= CONSEC_CTS => relay.request_off(*client_id),
            _ => Ok(()),
        }
    }
}

impl Default for RelayBound {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound that, once its consecutive-count gate opens, dispatches an alert.
pub struct AlertBound {
    pub bound: Bound,
    pub enabled: bool,
    dispatch: AlertDispatch,
}

impl AlertBound {
    pub fn new() -> Self {
        Self {
            bound: Bound::new(Condition::None, 0.0, HYSTERESIS),
            enabled: false,
            dispatch: AlertDispatch::new(),
        }
    }

    fn apply(&mut self, value: f32, alert: &dyn crate::alert::AlertSink, caller_tag: &str, message: impl Fn() -> String) {
        if !self.enabled || self.bound.condition == Condition::None {
            return;
        }
        match self.bound.evaluate(value) {
            Crossing::Tripped { on_ct } if on_ct >= CONSEC_CTS => {
                self.dispatch.trip(alert, caller_tag, &message());
            }
            Crossing::Cleared { off_ct } if off_ct >= CONSEC_CTS => {
                self.dispatch.clear();
            }
            _ => {}
        }
    }
}

impl Default for AlertBound {
    fn default() -> Self {
        Self::new()
    }
}

struct Averages {
    temp: f32,
    hum: f32,
    prev_temp: f32,
    prev_hum: f32,
    poll_count: u64,
}

impl Averages {
    fn new() -> Self {
        Self { temp: 0.0, hum: 0.0, prev_temp: 0.0, prev_hum: 0.0, poll_count: 0 }
    }

    fn record(&mut self, temp_c: f32, hum: f32) {
        self.poll_count += 1;
        self.temp += (temp_c - self.temp) / self.poll_count as f32;
        self.hum += (hum - self.hum) / self.poll_count as f32;
    }

    fn clear(&mut self) {
        self.prev_temp = self.temp;
        self.prev_hum = self.hum;
        self.temp = 0.0;
        self.hum = 0.0;
        self.poll_count = 0;
    }
}

struct State {
    reading: ShtValues,
    safe: bool,
    display_error: bool,
    consecutive_errors: u32,
    averages: Averages,
    temp_relay: RelayBound,
    hum_relay: RelayBound,
    temp_alert: AlertBound,
    hum_alert: AlertBound,
}

/// Snapshot used by C13 to persist/restore the temp and humidity bound
/// configuration (§6.2 `tempSave`/`humSave`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThBoundSnapshot {
    pub relay_num: Option<u8>,
    pub relay_condition: Condition,
    pub relay_trip: f32,
    pub alert_enabled: bool,
    pub alert_condition: Condition,
    pub alert_trip: f32,
}

/// Temperature/humidity sensor component (C9). One instance is owned at the
/// application root and shared via `Arc` with the sensor task and the HTTP
/// layer (out of scope).
pub struct TempHum {
    state: BoundedMutex<State>,
    down_pkg: BoundedMutex<SensDownPkg>,
}

impl TempHum {
    pub fn new() -> Self {
        Self {
            state: BoundedMutex::new(
                "temp_hum",
                State {
                    reading: ShtValues::default(),
                    safe: false,
                    display_error: false,
                    consecutive_errors: 0,
                    averages: Averages::new(),
                    temp_relay: RelayBound::new(),
                    hum_relay: RelayBound::new(),
                    temp_alert: AlertBound::new(),
                    hum_alert: AlertBound::new(),
                },
            ),
            down_pkg: BoundedMutex::new("temp_hum_down_pkg", SensDownPkg::new("(TEMPHUM)")),
        }
    }

    /// One sample iteration: read, update averages/health on success, and
    /// evaluate bounds. Mirrors `TempHum::read()` + `TempHum::checkBounds()`.
    pub fn sample(&self, driver: &mut dyn TempHumDriver, alert: &dyn crate::alert::AlertSink) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        match driver.read_all() {
            Ok(reading) => {
                state.reading = reading;
                state.safe = true;
                state.display_error = false;
                state.consecutive_errors = 0;
                state.averages.record(reading.temp_c, reading.humidity);

                state.temp_relay.apply(reading.temp_c)?;
                state.hum_relay.apply(reading.humidity)?;
                let temp_c = reading.temp_c;
                let temp_f = reading.temp_f;
                let hum = reading.humidity;
                state.temp_alert.apply(temp_c, alert, "(TEMPHUM)", move || {
                    format!("Alert: Temp at {temp_c:.2}C/{temp_f:.2}F")
                });
                state.hum_alert.apply(hum, alert, "(TEMPHUM)", move || format!("Alert: Humidity at {hum:.2}%"));
            }
            Err(e) => {
                state.safe = false;
                state.consecutive_errors += 1;
                if state.consecutive_errors >= ERR_CT_MAX && !state.display_error {
                    state.display_error = true;
                    log::error!("(TEMPHUM) sensor read failing: {e}");
                }
            }
        }
        Ok(())
    }

    /// §4.7 `monitor_sensor`: health-debounced sensor up/down alerting,
    /// driven from a health score derived from recent read success.
    pub fn monitor_health(&self, alert: &dyn crate::alert::AlertSink) -> GreenhouseResult<()> {
        let health = if self.state.lock()?.safe { 1.0 } else { 0.0 };
        self.down_pkg.lock()?.monitor(alert, health);
        Ok(())
    }

    pub fn is_safe(&self) -> bool {
        self.state.lock().map(|s| s.safe).unwrap_or(false)
    }

    pub fn display_error(&self) -> bool {
        self.state.lock().map(|s| s.display_error).unwrap_or(false)
    }

    pub fn temp_c(&self) -> f32 {
        self.state.lock().map(|s| s.reading.temp_c).unwrap_or(0.0)
    }

    pub fn humidity(&self) -> f32 {
        self.state.lock().map(|s| s.reading.humidity).unwrap_or(0.0)
    }

    /// §4.6: rotates current averages to previous and zeroes the running
    /// mean, called once per clear-averages window.
    pub fn clear_averages(&self) -> GreenhouseResult<()> {
        self.state.lock()?.averages.clear();
        Ok(())
    }

    pub fn averages(&self) -> (f32, f32, f32, f32) {
        self.state
            .lock()
            .map(|s| (s.averages.temp, s.averages.hum, s.averages.prev_temp, s.averages.prev_hum))
            .unwrap_or_default()
    }

    pub fn attach_temp_relay(&self, relay: Arc<Relay>, client_id: ClientId, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.temp_relay.attach_relay(relay, client_id);
        state.temp_relay.bound.set_condition(condition);
        state.temp_relay.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn attach_hum_relay(&self, relay: Arc<Relay>, client_id: ClientId, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.hum_relay.attach_relay(relay, client_id);
        state.hum_relay.bound.set_condition(condition);
        state.hum_relay.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn set_temp_alert(&self, enabled: bool, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.temp_alert.enabled = enabled;
        state.temp_alert.bound.set_condition(condition);
        state.temp_alert.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn set_hum_alert(&self, enabled: bool, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.hum_alert.enabled = enabled;
        state.hum_alert.bound.set_condition(condition);
        state.hum_alert.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn temp_bound_snapshot(&self) -> ThBoundSnapshot {
        let state = self.state.lock().ok();
        let (relay_num, relay_cond, relay_trip) = state
            .as_ref()
            .map(|s| (s.temp_relay.relay_index(), s.temp_relay.bound.condition, s.temp_relay.bound.trip_val))
            .unwrap_or((None, Condition::None, 0.0));
        let (alert_en, alert_cond, alert_trip) = state
            .as_ref()
            .map(|s| (s.temp_alert.enabled, s.temp_alert.bound.condition, s.temp_alert.bound.trip_val))
            .unwrap_or((false, Condition::None, 0.0));
        ThBoundSnapshot {
            relay_num,
            relay_condition: relay_cond,
            relay_trip,
            alert_enabled: alert_en,
            alert_condition: alert_cond,
            alert_trip,
        }
    }

    pub fn hum_bound_snapshot(&self) -> ThBoundSnapshot {
        let state = self.state.lock().ok();
        let (relay_num, relay_cond, relay_trip) = state
            .as_ref()
            .map(|s| (s.hum_relay.relay_index(), s.hum_relay.bound.condition, s.hum_relay.bound.trip_val))
            .unwrap_or((None, Condition::None, 0.0));
        let (alert_en, alert_cond, alert_trip) = state
            .as_ref()
            .map(|s| (s.hum_alert.enabled, s.hum_alert.bound.condition, s.hum_alert.bound.trip_val))
            .unwrap_or((false, Condition::None, 0.0));
        ThBoundSnapshot {
            relay_num,
            relay_condition: relay_cond,
            relay_trip,
            alert_enabled: alert_en,
            alert_condition: alert_cond,
            alert_trip,
        }
    }
}

impl Default for TempHum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NullAlertSink;
    use crate::relay::RelayDriver;

    struct NullDriver;
    impl RelayDriver for NullDriver {
        fn energize(&mut self, _i: u8, _on: bool) -> GreenhouseResult<()> {
            Ok(())
        }
    }

    struct ScriptedDriver {
        samples: std::vec::IntoIter<f32>,
    }
    impl TempHumDriver for ScriptedDriver {
        fn read_all(&mut self) -> GreenhouseResult<ShtValues> {
            let temp_c = self.samples.next().unwrap();
            Ok(ShtValues { temp_c, temp_f: temp_c * 1.8 + 32.0, humidity: 50.0 })
        }
    }

    #[test]
    fn scenario_s3_temp_bound_hysteresis() {
        let th = TempHum::new();
        let relay = Arc::new(Relay::new(0, "(RE0)", Box::new(NullDriver)));
        let client = relay.acquire("(TEMPHUM)").unwrap();
        th.attach_temp_relay(relay.clone(), client, Condition::GtrThan, 30.0).unwrap();

        let mut driver = ScriptedDriver { samples: vec![30.5; CONSEC_CTS as usize].into_iter() };
        let sink = NullAlertSink;
        for _ in 0..CONSEC_CTS {
            th.sample(&mut driver, &sink).unwrap();
        }
        assert!(relay.physically_on(), "relay should energize after CONSEC_CTS consecutive trips");

        let mut driver = ScriptedDriver { samples: vec![29.0; CONSEC_CTS as usize].into_iter() };
        for _ in 0..CONSEC_CTS {
            th.sample(&mut driver, &sink).unwrap();
        }
        assert!(!relay.physically_on(), "relay should de-energize after CONSEC_CTS consecutive clears <= 29.0");
    }

    #[test]
    fn unsafe_reading_does_not_clear_consecutive_count() {
        struct FlakyDriver {
            calls: u32,
        }
        impl TempHumDriver for FlakyDriver {
            fn read_all(&mut self) -> GreenhouseResult<ShtValues> {
                self.calls += 1;
                if self.calls == 2 {
                    Err(crate::error::GreenhouseError::sensor("transient"))
                } else {
                    Ok(ShtValues { temp_c: 31.0, temp_f: 87.8, humidity: 50.0 })
                }
            }
        }
        let th = TempHum::new();
        let relay = Arc::new(Relay::new(0, "(RE0)", Box::new(NullDriver)));
        let client = relay.acquire("(TEMPHUM)").unwrap();
        th.attach_temp_relay(relay.clone(), client, Condition::GtrThan, 30.0).unwrap();
        let sink = NullAlertSink;
        let mut driver = FlakyDriver { calls: 0 };
        th.sample(&mut driver, &sink).unwrap(); // ok, on_ct=1
        th.sample(&mut driver, &sink).unwrap(); // failed read, no bound eval
        th.sample(&mut driver, &sink).unwrap(); // ok, on_ct=2
        th.sample(&mut driver, &sink).unwrap(); // ok, on_ct=3
        th.sample(&mut driver, &sink).unwrap(); // ok, on_ct=4... needs a 5th good sample
        assert!(!relay.physically_on());
        th.sample(&mut driver, &sink).unwrap();
        // 5 good reads so far contributed to on_ct: calls 1, 3, 4, 5, 6 = CONSEC_CTS
        assert!(relay.physically_on());
    }
}
