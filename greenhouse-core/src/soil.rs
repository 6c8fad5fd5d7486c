//! Four-channel soil moisture sensor task: alert-only bounds (C11).
//!
//! Grounded on `original_source/GHS/src/Peripherals/Soil.cpp` and
//! `include/Peripherals/Soil.hpp`: four ADC channels read sequentially,
//! each with an [`crate::alert::AlertDispatch`]-backed bound and no relay
//! attachment at all.

use crate::alert::{AlertDispatch, AlertSink};
use crate::bounds::{Bound, Condition, Crossing};
use crate::collaborators::SoilAdcDriver;
use crate::error::GreenhouseResult;
use crate::sync::BoundedMutex;

pub const SOIL_SENSORS: usize = 4;
pub const CONSEC_CTS: u32 = 5;
pub const HYSTERESIS: f32 = 50.0;
pub const ERR_CT_MAX: u32 = 3;

struct Channel {
    reading: i32,
    bound: Bound,
    enabled: bool,
    dispatch: AlertDispatch,
}

impl Channel {
    fn new() -> Self {
        Self {
            reading: 0,
            bound: Bound::new(Condition::None, 0.0, HYSTERESIS),
            enabled: false,
            dispatch: AlertDispatch::new(),
        }
    }
}

struct State {
    channels: [Channel; SOIL_SENSORS],
    safe: bool,
    display_error: bool,
    consecutive_errors: u32,
}

/// Snapshot used by C13 for `soil{1..4}Save` (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SoilBoundSnapshot {
    pub enabled: bool,
    pub condition: Condition,
    pub trip_val: f32,
}

/// Soil sensor component (C11).
pub struct Soil {
    state: BoundedMutex<State>,
}

impl Soil {
    pub fn new() -> Self {
        Self {
            state: BoundedMutex::new(
                "soil",
                State {
                    channels: std::array::from_fn(|_| Channel::new()),
                    safe: false,
                    display_error: false,
                    consecutive_errors: 0,
                },
            ),
        }
    }

    pub fn sample(&self, driver: &mut dyn SoilAdcDriver, alert: &dyn AlertSink) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        match driver.read_all_channels() {
            Ok(readings) => {
                state.safe = true;
                state.display_error = false;
                state.consecutive_errors = 0;
                for (ch, value) in state.channels.iter_mut().zip(readings.iter()) {
                    ch.reading = *value;
                    if !ch.enabled || ch.bound.condition == Condition::None {
                        continue;
                    }
                    match ch.bound.evaluate(*value as f32) {
                        Crossing::Tripped { on_ct } if on_ct >= CONSEC_CTS => {
                            ch.dispatch.trip(alert, "(SOIL)", &format!("Alert: Soil reading {value}"));
                        }
                        Crossing::Cleared { off_ct } if off_ct >= CONSEC_CTS => {
                            ch.dispatch.clear();
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                state.safe = false;
                state.consecutive_errors += 1;
                if state.consecutive_errors >= ERR_CT_MAX && !state.display_error {
                    state.display_error = true;
                    log::error!("(SOIL) sensor read failing: {e}");
                }
            }
        }
        Ok(())
    }

    pub fn set_channel_bound(&self, index: usize, enabled: bool, condition: Condition, trip_val: f32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        let ch = state
            .channels
            .get_mut(index)
            .ok_or_else(|| crate::error::GreenhouseError::not_found(format!("soil channel {index}")))?;
        ch.enabled = enabled;
        ch.bound.set_condition(condition);
        ch.bound.trip_val = trip_val;
        Ok(())
    }

    pub fn channel_snapshot(&self, index: usize) -> SoilBoundSnapshot {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.channels.get(index).map(|c| SoilBoundSnapshot { enabled: c.enabled, condition: c.bound.condition, trip_val: c.bound.trip_val }))
            .unwrap_or(SoilBoundSnapshot { enabled: false, condition: Condition::None, trip_val: 0.0 })
    }

    pub fn readings(&self) -> [i32; SOIL_SENSORS] {
        self.state.lock().map(|s| std::array::from_fn(|i| s.channels[i].reading)).unwrap_or([0; SOIL_SENSORS])
    }

    /// Soil keeps no running averages, but C12's hourly report asks every
    /// sensor for a JSON snapshot uniformly.
    pub fn report_snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "readings": self.readings() })
    }

    /// §4.6: soil has no averages to clear, but the report scheduler calls
    /// this uniformly across sensors; kept as a no-op match.
    pub fn clear_averages(&self) -> GreenhouseResult<()> {
        Ok(())
    }
}

impl Default for Soil {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedDriver {
        readings: std::vec::IntoIter<[i32; SOIL_SENSORS]>,
    }
    impl SoilAdcDriver for ScriptedDriver {
        fn read_all_channels(&mut self) -> GreenhouseResult<[i32; SOIL_SENSORS]> {
            Ok(self.readings.next().unwrap())
        }
    }

    #[test]
    fn channel_alert_fires_after_consecutive_trips() {
        use crate::alert::NullAlertSink;
        let soil = Soil::new();
        soil.set_channel_bound(0, true, Condition::LessThan, 500.0).unwrap();
        let mut driver = ScriptedDriver {
            readings: vec![[100, 0, 0, 0]; 5].into_iter(),
        };
        let sink = NullAlertSink;
        for _ in 0..5 {
            soil.sample(&mut driver, &sink).unwrap();
        }
        assert_eq!(soil.readings()[0], 100);
    }

    #[test]
    fn disabled_channel_never_evaluates() {
        let soil = Soil::new();
        let mut driver = ScriptedDriver { readings: vec![[0, 0, 0, 0]].into_iter() };
        let sink = crate::alert::NullAlertSink;
        soil.sample(&mut driver, &sink).unwrap();
        assert_eq!(soil.channel_snapshot(1).condition, Condition::None);
    }
}
