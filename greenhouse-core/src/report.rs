//! Hourly report / daily averages-clear scheduler (C12).
//!
//! Grounded on `original_source/GHS/src/Peripherals/Report.cpp` and
//! `Peripherals/Averages.cpp`: a 1 Hz `manage()` that (a) clears every
//! sensor's averages once per day inside a short window around a
//! configurable clear-time, (b) logs "NEW DAY" once per day right after
//! midnight, and (c) compiles + sends one JSON report per wall-clock hour,
//! retrying up to [`SEND_ATTEMPTS`] times within the same hour before giving
//! up and advancing anyway.

use crate::alert::AlertClient;
use crate::clock::{Clock, WallTime, SECONDS_PER_DAY};
use crate::error::GreenhouseResult;
use crate::light::Light;
use crate::relay::{Relay, Timer};
use crate::soil::Soil;
use crate::sync::BoundedMutex;
use crate::temp_hum::TempHum;
use std::sync::Arc;

/// Default clear-averages time: 23:59:00, matching the original's
/// `MAX_SET_TIME`. Also the ceiling any caller-supplied timer is clamped to.
pub const MAX_SET_TIME: u32 = 86_340;
/// Width of the "are we near the clear/new-day boundary" window, in seconds.
pub const TIME_PADDING: u32 = 50;
pub const SEND_ATTEMPTS: u32 = 3;

struct State {
    clear_time: u32,
    clear_window_open: bool,
    new_day_window_open: bool,
    last_hour: u8,
    hour_initialized: bool,
    send_attempts: u32,
}

/// Periodic report/averages scheduler (C12). Owns no sensor data itself;
/// it reads each sensor's averages/trip config through the shared `Arc`
/// handles and hands the compiled JSON to C8.
pub struct Report {
    clock: Arc<Clock>,
    state: BoundedMutex<State>,
    firmware_version: &'static str,
    device_id: &'static str,
}

impl Report {
    pub fn new(clock: Arc<Clock>, firmware_version: &'static str, device_id: &'static str) -> Self {
        Self {
            clock,
            state: BoundedMutex::new(
                "report",
                State {
                    clear_time: MAX_SET_TIME,
                    clear_window_open: true,
                    new_day_window_open: true,
                    last_hour: 0,
                    hour_initialized: false,
                    send_attempts: 0,
                },
            ),
            firmware_version,
            device_id,
        }
    }

    /// Clamps into `0..=MAX_SET_TIME`, matching `Report::setTimer`.
    pub fn set_timer(&self, seconds_of_day: u32) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        state.clear_time = seconds_of_day.min(MAX_SET_TIME);
        log::info!("(REPORT) average clear timer set to {} seconds", state.clear_time);
        Ok(())
    }

    pub fn clear_time(&self) -> u32 {
        self.state.lock().map(|s| s.clear_time).unwrap_or(MAX_SET_TIME)
    }

    /// Runs at 1 Hz. Drives the clear-averages window, the new-day log, and
    /// the hourly report dispatch.
    #[allow(clippy::too_many_arguments)]
    pub fn manage(
        &self,
        wall: WallTime,
        temp_hum: &TempHum,
        light: &Light,
        soil: &Soil,
        relays: &[Arc<Relay>],
        alert: &AlertClient,
    ) -> GreenhouseResult<()> {
        let mut state = self.state.lock()?;
        let sys_time = wall.seconds_of_day;

        let in_clear_range = sys_time >= state.clear_time && sys_time <= state.clear_time + TIME_PADDING;
        if state.clear_window_open && in_clear_range {
            state.clear_window_open = false;
            drop(state);
            temp_hum.clear_averages()?;
            light.clear_averages()?;
            soil.clear_averages()?;
            state = self.state.lock()?;
        } else if !state.clear_window_open && !in_clear_range {
            state.clear_window_open = true;
        }

        let in_new_day_range = sys_time <= TIME_PADDING;
        if state.new_day_window_open && in_new_day_range {
            state.new_day_window_open = false;
            log::info!("(REPORT) NEW DAY");
        } else if !state.new_day_window_open && !in_new_day_range {
            state.new_day_window_open = true;
        }

        if !state.hour_initialized {
            state.last_hour = wall.hour;
            state.hour_initialized = true;
        }

        if wall.hour != state.last_hour {
            let report = compile_report(self.firmware_version, self.device_id, &self.clock, wall, temp_hum, light, soil, relays);
            drop(state);
            let sent = alert.send_report(&report).unwrap_or(false);
            state = self.state.lock()?;
            if sent {
                state.send_attempts = 0;
                state.last_hour = wall.hour;
            } else {
                state.send_attempts += 1;
                if state.send_attempts >= SEND_ATTEMPTS {
                    log::warn!("(REPORT) giving up on report send after {SEND_ATTEMPTS} attempts this hour");
                    state.send_attempts = 0;
                    state.last_hour = wall.hour;
                }
            }
        }

        Ok(())
    }
}

fn timer_json(timer: Timer) -> serde_json::Value {
    serde_json::json!({
        "onTime": timer.on_time.unwrap_or(crate::relay::TIMER_OFF),
        "offTime": timer.off_time.unwrap_or(crate::relay::TIMER_OFF),
        "weekdays": timer.weekdays,
    })
}

/// Compiles the hourly report's stable JSON shape.
#[allow(clippy::too_many_arguments)]
fn compile_report(
    firmware_version: &str,
    device_id: &str,
    clock: &Clock,
    wall: WallTime,
    temp_hum: &TempHum,
    light: &Light,
    soil: &Soil,
    relays: &[Arc<Relay>],
) -> serde_json::Value {
    let (temp_avg, hum_avg, temp_prev_avg, hum_prev_avg) = temp_hum.averages();
    let mut relay_fields = serde_json::Map::new();
    for (i, relay) in relays.iter().enumerate() {
        relay_fields.insert(
            format!("re{}", i + 1),
            serde_json::json!({
                "state": format!("{:?}", relay.state()),
                "timer": timer_json(relay.timer()),
            }),
        );
    }

    let mut report = serde_json::json!({
        "firmv": firmware_version,
        "id": device_id,
        "sysTime": wall.seconds_of_day,
        "hhmmss": format!("{}:{}:{}", wall.hour, wall.minute, wall.second),
        "timeCalib": if clock.is_calibrated() { 1 } else { 0 },
        "temp": temp_hum.temp_c(),
        "tempAvg": temp_avg,
        "tempPrevAvg": temp_prev_avg,
        "hum": temp_hum.humidity(),
        "humAvg": hum_avg,
        "humPrevAvg": hum_prev_avg,
        "light": light.report_snapshot(),
        "soil": soil.report_snapshot(),
    });
    if let serde_json::Value::Object(ref mut map) = report {
        map.extend(relay_fields);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CredentialProvider, NetworkMode, NetworkStatus, StationDetails};
    use crate::heartbeat::{Heartbeat, RestartHandler};

    struct NoopRestart;
    impl RestartHandler for NoopRestart {
        fn save_and_restart(&self) {}
    }

    struct OfflineNetwork;
    impl NetworkStatus for OfflineNetwork {
        fn mode(&self) -> NetworkMode {
            NetworkMode::None
        }
        fn is_active(&self) -> bool {
            false
        }
        fn station_details(&self) -> Option<StationDetails> {
            None
        }
    }

    struct NoCreds;
    impl CredentialProvider for NoCreds {
        fn api_key(&self) -> Option<String> {
            None
        }
        fn phone(&self) -> Option<String> {
            None
        }
    }

    fn alert_client() -> AlertClient {
        let hb = Arc::new(Heartbeat::new(Arc::new(NoopRestart)));
        AlertClient::new("http://127.0.0.1:0/alert", hb, Arc::new(OfflineNetwork), Arc::new(NoCreds)).unwrap()
    }

    #[test]
    fn clear_timer_clamps_to_max_set_time() {
        let report = Report::new(Arc::new(Clock::new()), "1.0.0", "dev-1");
        report.set_timer(SECONDS_PER_DAY).unwrap();
        assert_eq!(report.clear_time(), MAX_SET_TIME);
    }

    #[test]
    fn hourly_tick_advances_last_hour_even_when_send_fails() {
        let clock = Arc::new(Clock::new());
        let report = Report::new(clock.clone(), "1.0.0", "dev-1");
        let temp_hum = TempHum::new();
        let light = Light::new();
        let soil = Soil::new();
        let alert = alert_client();

        let wall0 = WallTime { hour: 0, minute: 0, second: 0, seconds_of_day: 0 };
        report.manage(wall0, &temp_hum, &light, &soil, &[], &alert).unwrap();

        let wall1 = WallTime { hour: 1, minute: 0, second: 0, seconds_of_day: 3600 };
        for _ in 0..(SEND_ATTEMPTS + 1) {
            report.manage(wall1, &temp_hum, &light, &soil, &[], &alert).unwrap();
        }
        // After exceeding SEND_ATTEMPTS the scheduler gives up and advances
        // last_hour, so a further tick at the same hour does not retry again.
        let state = report.state.lock().unwrap();
        assert_eq!(state.last_hour, 1);
    }
}
