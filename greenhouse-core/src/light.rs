//! Light sensor task: spectral + photoresistor averages, hourly trends,
//! day/night duration tracking, relay-via-photoresistor (C10).
//!
//! Grounded on `original_source/GHS/src/Peripherals/Light.cpp` and
//! `include/Peripherals/Light.hpp`. Unlike temp/hum and soil, light has no
//! alert bound at all; "ALERTS not used for light, relay ONLY" per the
//! original's own comment; so only a [`crate::bounds::Bound`] driving a
//! relay exists here, attached to the photoresistor reading.

use crate::bounds::{Bound, Condition, Crossing};
use crate::collaborators::{PhotoDriver, SpectralColor, SpectralDriver};
use crate::error::GreenhouseResult;
use crate::flags::FlagReg;
use crate::relay::{ClientId, Relay};
use crate::sync::BoundedMutex;
use std::sync::Arc;

const SPEC_DISPLAY_ERROR_BIT: u8 = 0;
const PHOTO_DISPLAY_ERROR_BIT: u8 = 1;

/// Hours of on-the-hour trend history retained per channel.
pub const TREND_HOURS: usize = 24;
pub const CONSECUTIVE_CTS: u32 = 5;
pub const HYSTERESIS: f32 = 10.0;
pub const ERR_CT_MAX: u32 = 3;
/// Default "is it dark" threshold for the photoresistor, between 0 and 4095.
pub const DARK_VAL_DEFAULT: i32 = 500;
pub const PHOTO_MIN: i32 = 1;
pub const PHOTO_MAX: i32 = 4094;

#[derive(Debug, Clone, Copy, Default)]
struct ColorAverages {
    clear: f32,
    violet: f32,
    indigo: f32,
    blue: f32,
    cyan: f32,
    green: f32,
    yellow: f32,
    orange: f32,
    red: f32,
    nir: f32,
}

impl ColorAverages {
    fn record(&mut self, reading: &SpectralColor, poll_count: u64) {
        let n = poll_count as f32;
        self.clear += (reading.clear as f32 - self.clear) / n;
        self.violet += (reading.f1_violet as f32 - self.violet) / n;
        self.indigo += (reading.f2_indigo as f32 - self.indigo) / n;
        self.blue += (reading.f3_blue as f32 - self.blue) / n;
        self.cyan += (reading.f4_cyan as f32 - self.cyan) / n;
        self.green += (reading.f5_green as f32 - self.green) / n;
        self.yellow += (reading.f6_yellow as f32 - self.yellow) / n;
        self.orange += (reading.f7_orange as f32 - self.orange) / n;
        self.red += (reading.f8_red as f32 - self.red) / n;
        self.nir += (reading.nir as f32 - self.nir) / n;
    }
}

/// Ring of the last [`TREND_HOURS`] on-the-hour readings per channel.
struct Trends {
    clear: [u16; TREND_HOURS],
    photo: [u16; TREND_HOURS],
    next: usize,
    filled: usize,
}

impl Trends {
    fn new() -> Self {
        Self { clear: [0; TREND_HOURS], photo: [0; TREND_HOURS], next: 0, filled: 0 }
    }

    fn record_hour(&mut self, clear: u16, photo: u16) {
        self.clear[self.next] = clear;
        self.photo[self.next] = photo;
        self.next = (self.next + 1) % TREND_HOURS;
        self.filled = (self.filled + 1).min(TREND_HOURS);
    }
}

struct Averages {
    color: ColorAverages,
    prev_color: ColorAverages,
    photoresistor: f32,
    prev_photoresistor: f32,
    poll_ct_color: u64,
    poll_ct_photo: u64,
}

impl Averages {
    fn new() -> Self {
        Self {
            color: ColorAverages::default(),
            prev_color: ColorAverages::default(),
            photoresistor: 0.0,
            prev_photoresistor: 0.0,
            poll_ct_color: 0,
            poll_ct_photo: 0,
        }
    }

    fn record_color(&mut self, reading: &SpectralColor) {
        self.poll_ct_color += 1;
        self.color.record(reading, self.poll_ct_color);
    }

    fn record_photo(&mut self, photo: i32) {
        self.poll_ct_photo += 1;
        self.photoresistor += (photo as f32 - self.photoresistor) / self.poll_ct_photo as f32;
    }

    fn clear(&mut self) {
        self.prev_color = self.color;
        self.prev_photoresistor = self.photoresistor;
        self.color = ColorAverages::default();
        self.photoresistor = 0.0;
        self.poll_ct_color = 0;
        self.poll_ct_photo = 0;
    }
}

/// Tracks how long the photoresistor has continuously read "light" so far
/// today, per `computeLightTime` in the original. The day/night edge itself
/// is debounced by [`CONSECUTIVE_CTS`] consecutive same-direction readings
/// before "light start"/"light end" is considered to have actually
/// happened.
struct DurationTracker {
    was_light: Option<bool>,
    pending: Option<bool>,
    pending_ct: u32,
    light_start: u64,
    duration: u32,
}

impl DurationTracker {
    fn new() -> Self {
        Self { was_light: None, pending: None, pending_ct: 0, light_start: 0, duration: 0 }
    }

    fn update(&mut self, is_light: bool, now_secs: u64) {
        if Some(is_light) == self.was_light {
            self.pending = None;
            self.pending_ct = 0;
            if is_light {
                self.duration = (now_secs - self.light_start) as u32;
            }
            return;
        }

        if self.pending == Some(is_light) {
            self.pending_ct += 1;
        } else {
            self.pending = Some(is_light);
            self.pending_ct = 1;
        }

        if self.pending_ct < CONSECUTIVE_CTS {
            return;
        }

        self.pending = None;
        self.pending_ct = 0;
        if is_light {
            log::info!("(LIGHT) light start");
            self.light_start = now_secs;
            self.duration = 0;
        } else {
            log::info!("(LIGHT) light end, duration {}s", now_secs.saturating_sub(self.light_start));
        }
        self.was_light = Some(is_light);
    }
}

struct State {
    spectral: SpectralColor,
    photo: i32,
    spec_safe: bool,
    photo_safe: bool,
    display_error: FlagReg,
    spec_consecutive_errors: u32,
    photo_consecutive_errors: u32,
    averages: Averages,
    trends: Trends,
    duration: DurationTracker,
    bound: Bound,
    dark_val: i32,
    relay: Option<(Arc<Relay>, ClientId)>,
}

/// Snapshot used by C13 for `lightSave` (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LightBoundSnapshot {
    pub relay_num: Option<u8>,
    pub condition: Condition,
    pub trip_val: f32,
    pub dark_val: i32,
}

/// Light sensor component (C10). Combines the AS7341-equivalent spectral
/// driver and a photoresistor ADC driver behind one lock, since both feed
/// the same hourly trend/report cycle.
pub struct Light {
    state: BoundedMutex<State>,
}

impl Light {
    pub fn new() -> Self {
        Self {
            state: BoundedMutex::new(
                "light",
                State {
                    spectral: SpectralColor::default(),
                    photo: 0,
                    spec_safe: false,
                    photo_safe: false,
                    display_error: FlagReg::new(),
                    spec_consecutive_errors: 0,
                    photo_consecutive_errors: 0,
                    averages: Averages::new(),
                    trends: Trends::new(),
                    duration: DurationTracker::new(),
                    bound: Bound::new(Condition::None, DARK_VAL_DEFAULT as f32, HYSTERESIS),
                    dark_val: DARK_VAL_DEFAULT,
                    relay: None,
                },
            ),
        }
    }

    pub fn sample_spectrum(&self, driver: &mut dyn SpectralDriver) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        match driver.read_all() {
            Ok(reading) => {
                state.spectral = reading;
                state.spec_safe = true;
                state.display_error.release_flag(SPEC_DISPLAY_ERROR_BIT);
                state.spec_consecutive_errors = 0;
                state.averages.record_color(&reading);
            }
            Err(e) => {
                state.spec_safe = false;
                state.spec_consecutive_errors += 1;
                if state.spec_consecutive_errors >= ERR_CT_MAX && !state.display_error.get_flag(SPEC_DISPLAY_ERROR_BIT) {
                    state.display_error.set_flag(SPEC_DISPLAY_ERROR_BIT);
                    log::error!("(LIGHT) spectral read failing: {e}");
                }
            }
        }
        Ok(())
    }

    /// Reads the photoresistor, updates averages/duration, and evaluates the
    /// relay bound. `now_secs` is the clock's monotonic seconds, used only
    /// for the light-duration computation.
    pub fn sample_photo(&self, driver: &mut dyn PhotoDriver, now_secs: u64) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        match driver.read_photo() {
            Ok(photo) => {
                state.photo = photo;
                state.photo_safe = true;
                state.display_error.release_flag(PHOTO_DISPLAY_ERROR_BIT);
                state.photo_consecutive_errors = 0;
                state.averages.record_photo(photo);

                let is_light = photo >= state.dark_val;
                state.duration.update(is_light, now_secs);

                let condition = state.bound.condition;
                if condition != Condition::None {
                    let relay = state.relay.clone();
                    match state.bound.evaluate(photo as f32) {
                        Crossing::Tripped { on_ct } if on_ct >= CONSECUTIVE_CTS => {
                            if let Some((relay, client_id)) = relay {
                                relay.request_on(client_id)?;
                            }
                        }
                        Crossing::Cleared { off_ct } if off_ct >= CONSECUTIVE_CTS => {
                            if let Some((relay, client_id)) = relay {
                                relay.request_off(client_id)?;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                state.photo_safe = false;
                state.photo_consecutive_errors += 1;
                if state.photo_consecutive_errors >= ERR_CT_MAX && !state.display_error.get_flag(PHOTO_DISPLAY_ERROR_BIT) {
                    state.display_error.set_flag(PHOTO_DISPLAY_ERROR_BIT);
                    log::error!("(LIGHT) photoresistor read failing: {e}");
                }
            }
        }
        Ok(())
    }

    /// Called once per hour on the hour by the report scheduler, before
    /// `clear_averages`. Records the current average into the trend ring.
    pub fn record_hourly_trend(&self) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        let clear = state.averages.color.clear as u16;
        let photo = state.averages.photoresistor as u16;
        state.trends.record_hour(clear, photo);
        Ok(())
    }

    pub fn attach_relay(&self, relay: Arc<Relay>, client_id: ClientId, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.relay = Some((relay, client_id));
        state.bound.set_condition(condition);
        state.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn set_dark_val(&self, dark_val: i32) -> GreenhouseResult<()> {
        self.state.lock()?.dark_val = dark_val.clamp(PHOTO_MIN, PHOTO_MAX);
        Ok(())
    }

    pub fn photo(&self) -> i32 {
        self.state.lock().map(|s| s.photo).unwrap_or(0)
    }

    pub fn duration(&self) -> u32 {
        self.state.lock().map(|s| s.duration.duration).unwrap_or(0)
    }

    pub fn bound_snapshot(&self) -> LightBoundSnapshot {
        self.state
            .lock()
            .map(|s| LightBoundSnapshot {
                relay_num: s.relay.as_ref().map(|(relay, _)| relay.index()),
                condition: s.bound.condition,
                trip_val: s.bound.trip_val,
                dark_val: s.dark_val,
            })
            .unwrap_or(LightBoundSnapshot {
                relay_num: None,
                condition: Condition::None,
                trip_val: DARK_VAL_DEFAULT as f32,
                dark_val: DARK_VAL_DEFAULT,
            })
    }

    /// §4.6: rotates current averages to previous and zeroes the running
    /// means for both spectral and photoresistor channels.
    pub fn clear_averages(&self) -> GreenhouseResult<()> {
        self.state.lock()?.averages.clear();
        Ok(())
    }

    pub fn report_snapshot(&self) -> serde_json::Value {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return serde_json::json!({}),
        };
        serde_json::json!({
            "photo": state.photo,
            "photoAvg": state.averages.photoresistor,
            "photoPrevAvg": state.averages.prev_photoresistor,
            "clearAvg": state.averages.color.clear,
            "lightDuration": state.duration.duration,
        })
    }
}

impl Default for Light {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayDriver;

    struct NullDriver;
    impl RelayDriver for NullDriver {
        fn energize(&mut self, _i: u8, _on: bool) -> GreenhouseResult<()> {
            Ok(())
        }
    }

    struct ScriptedPhoto {
        values: std::vec::IntoIter<i32>,
    }
    impl PhotoDriver for ScriptedPhoto {
        fn read_photo(&mut self) -> GreenhouseResult<i32> {
            Ok(self.values.next().unwrap())
        }
    }

    #[test]
    fn relay_energizes_after_consecutive_bright_reads() {
        let light = Light::new();
        let relay = Arc::new(Relay::new(0, "(RE0)", Box::new(NullDriver)));
        let client = relay.acquire("(LIGHT)").unwrap();
        light.attach_relay(relay.clone(), client, Condition::GtrThan, 500.0).unwrap();

        let mut driver = ScriptedPhoto { values: vec![600; 5].into_iter() };
        for i in 0..5 {
            light.sample_photo(&mut driver, i).unwrap();
        }
        assert!(relay.physically_on());
    }

    #[test]
    fn duration_accumulates_while_continuously_light() {
        let light = Light::new();
        // The day/night edge needs CONSECUTIVE_CTS consecutive bright
        // readings before "light start" registers.
        let mut driver = ScriptedPhoto { values: vec![600; CONSECUTIVE_CTS as usize].into_iter() };
        for t in 0..CONSECUTIVE_CTS as u64 {
            light.sample_photo(&mut driver, 100 + t * 10).unwrap();
        }
        assert_eq!(light.duration(), 0, "duration resets to 0 right as light starts");

        let mut driver = ScriptedPhoto { values: vec![600, 600].into_iter() };
        let start = 100 + (CONSECUTIVE_CTS as u64 - 1) * 10;
        light.sample_photo(&mut driver, start + 50).unwrap();
        light.sample_photo(&mut driver, start + 100).unwrap();
        assert_eq!(light.duration(), 100);
    }

    #[test]
    fn disabled_condition_never_touches_relay() {
        let light = Light::new();
        let mut driver = ScriptedPhoto { values: vec![4000].into_iter() };
        light.sample_photo(&mut driver, 0).unwrap();
        assert_eq!(light.bound_snapshot().condition, Condition::None);
    }
}
