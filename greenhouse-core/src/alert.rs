//! Remote alert/report client (C8).
//!
//! Grounded on `original_source/GHS/src/Peripherals/Alert.cpp`: a blocking
//! HTTP POST to a single alert endpoint, gated on station-mode networking
//! and valid credentials, plus the `monitorSens` health-debounced
//! sensor up/down alerting. The original's heartbeat-suspend-around-the-call
//! dance (`HB->suspendAll()` / `releaseAll()`) is reproduced exactly; the
//! call is genuinely blocking (`reqwest::blocking`, matching the original's
//! blocking `esp_http_client`), so the caller must hold the suspension for
//! its whole duration, not just enqueue it.

use crate::collaborators::{CredentialProvider, NetworkMode, NetworkStatus};
use crate::error::{GreenhouseError, GreenhouseResult};
use crate::heartbeat::Heartbeat;
use crate::sync::BoundedMutex;
use std::sync::Arc;
use std::time::Duration;

pub const WEB_TIMEOUT_MS: u64 = 5_000;
pub const ALT_CLEANUP_ATTEMPTS: u8 = 3;
pub const SENS_DOWN_CT: u32 = 3;
pub const SENS_UP_CT: u32 = 3;
pub const SENS_SEND_RETRIES: u32 = 3;

/// What `Alert::sendAlert`/`sendReport` reduce to: a caller-supplied sink so
/// sensor bound evaluation (C9, C11) doesn't depend on the concrete HTTP
/// client directly.
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, message: &str, caller_tag: &str) -> GreenhouseResult<()>;
}

/// A sink that drops every alert; used by tests and by any deployment that
/// hasn't wired a real [`AlertClient`] yet.
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn send_alert(&self, _message: &str, _caller_tag: &str) -> GreenhouseResult<()> {
        Ok(())
    }
}

/// Which alert was last sent for a bound, so a repeated trip doesn't re-send
/// (§4.5 "maintains a `sent_toggle`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSent {
    None,
    Sent,
}

/// Per-bound alert dispatch state: sends once on trip, resets on clear,
/// suppresses after `SENS_SEND_RETRIES` consecutive send failures until the
/// bound clears.
pub struct AlertDispatch {
    last_sent: LastSent,
    failed_attempts: u32,
}

impl AlertDispatch {
    pub fn new() -> Self {
        Self { last_sent: LastSent::None, failed_attempts: 0 }
    }

    pub fn trip(&mut self, alert: &dyn AlertSink, caller_tag: &str, message: &str) {
        if self.last_sent == LastSent::Sent {
            return;
        }
        match alert.send_alert(message, caller_tag) {
            Ok(()) => {
                self.last_sent = LastSent::Sent;
                self.failed_attempts = 0;
            }
            Err(e) => {
                self.failed_attempts += 1;
                log::warn!("{caller_tag} alert send failed ({}/{}): {e}", self.failed_attempts, SENS_SEND_RETRIES);
                if self.failed_attempts >= SENS_SEND_RETRIES {
                    log::error!("{caller_tag} alert send suppressed until next clear");
                    self.last_sent = LastSent::Sent;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_sent = LastSent::None;
        self.failed_attempts = 0;
    }
}

impl Default for AlertDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// One sensor's up/down health tracker (§4.7 `SensDownPkg`/`monitorSens`).
pub struct SensDownPkg {
    sensor_tag: &'static str,
    status_down: bool,
    prev_status_down: bool,
    counts: u32,
    last_sent: LastSentDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSentDirection {
    None,
    Down,
    Up,
}

/// Health score above which a sensor is considered up. Mirrors the
/// original's `HEALTH_ERR_MAX` threshold.
pub const HEALTH_ERR_MAX: f32 = 0.5;

impl SensDownPkg {
    pub fn new(sensor_tag: &'static str) -> Self {
        Self {
            sensor_tag,
            status_down: false,
            prev_status_down: false,
            counts: 0,
            last_sent: LastSentDirection::None,
        }
    }

    /// §4.7 `monitor_sensor`: transitions UP/DOWN on a single threshold,
    /// sends at most one alert per transition, gated by separate
    /// `SENS_DOWN_CT`/`SENS_UP_CT` debounce counts.
    pub fn monitor(&mut self, alert: &dyn AlertSink, health: f32) {
        let status_down = health <= HEALTH_ERR_MAX;
        if status_down != self.prev_status_down {
            self.counts = 0;
        }
        self.counts += 1;
        self.status_down = status_down;

        let mut send = None;
        if self.status_down && self.counts >= SENS_DOWN_CT && self.last_sent != LastSentDirection::Down {
            send = Some((LastSentDirection::Down, format!("{} DOWN", self.sensor_tag)));
        } else if !self.status_down && self.counts >= SENS_UP_CT && self.last_sent != LastSentDirection::Up {
            send = Some((LastSentDirection::Up, format!("{} UP", self.sensor_tag)));
        }
        self.prev_status_down = self.status_down;

        if let Some((direction, msg)) = send {
            let mut sent = false;
            for _ in 0..SENS_SEND_RETRIES.max(1) {
                if alert.send_alert(&msg, self.sensor_tag).is_ok() {
                    self.last_sent = direction;
                    sent = true;
                    break;
                }
            }
            if !sent {
                self.counts = 0;
            }
        }
    }
}

#[derive(serde::Serialize)]
struct AlertBody<'a> {
    #[serde(rename = "APIkey")]
    api_key: &'a str,
    phone: &'a str,
    msg: &'a str,
}

#[derive(serde::Serialize)]
struct ReportBody<'a> {
    #[serde(rename = "APIkey")]
    api_key: &'a str,
    phone: &'a str,
    report: &'a serde_json::Value,
}

/// The concrete HTTP alert/report client (C8). Blocking by design: the
/// whole point of the heartbeat suspend/release dance around it is that the
/// call may take up to [`WEB_TIMEOUT_MS`] and the caller should not be
/// considered dead while it runs.
pub struct AlertClient {
    endpoint: String,
    http: reqwest::blocking::Client,
    heartbeat: Arc<Heartbeat>,
    network: Arc<dyn NetworkStatus>,
    credentials: Arc<dyn CredentialProvider>,
    cleanup_failures: BoundedMutex<u8>,
}

impl AlertClient {
    pub fn new(
        endpoint: impl Into<String>,
        heartbeat: Arc<Heartbeat>,
        network: Arc<dyn NetworkStatus>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> GreenhouseResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(WEB_TIMEOUT_MS))
            .build()
            .map_err(GreenhouseError::from)?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
            heartbeat,
            network,
            credentials,
            cleanup_failures: BoundedMutex::new("alert_cleanup", 0),
        })
    }

    /// Refuses to run unless networking is in station mode and both
    /// credentials are present (§4.7).
    fn preflight(&self) -> Option<(String, String)> {
        if self.network.mode() != NetworkMode::Station {
            return None;
        }
        let api_key = self.credentials.api_key()?;
        let phone = self.credentials.phone()?;
        Some((api_key, phone))
    }

    /// Suspends all heartbeats for the duration of the blocking POST,
    /// releasing them unconditionally afterward (§4.7, §5).
    fn post(&self, body: &str) -> GreenhouseResult<bool> {
        let _ = self.heartbeat.suspend_all();
        let result = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send();
        let _ = self.heartbeat.release_all();

        let response = result.map_err(GreenhouseError::from)?;
        let text = response.text().map_err(GreenhouseError::from)?;
        Ok(text.trim() == "OK")
    }

    pub fn send_report(&self, report_json: &serde_json::Value) -> GreenhouseResult<bool> {
        let Some((api_key, phone)) = self.preflight() else {
            return Ok(false);
        };
        let body = ReportBody { api_key: &api_key, phone: &phone, report: report_json };
        let json = serde_json::to_string(&body)?;
        self.post(&json)
    }

    /// §4.8 cleanup-exhaustion path: three consecutive failed cleanups
    /// trigger save-and-restart via the heartbeat's restart handler (shared
    /// here since both paths ultimately call the same C13 primitive).
    pub fn note_cleanup_result(&self, ok: bool, restart: &dyn crate::heartbeat::RestartHandler) {
        let Ok(mut failures) = self.cleanup_failures.lock() else { return };
        if ok {
            *failures = 0;
            return;
        }
        *failures += 1;
        if *failures >= ALT_CLEANUP_ATTEMPTS {
            log::error!("(ALERT) unable to close connection after {ALT_CLEANUP_ATTEMPTS} attempts, restarting");
            restart.save_and_restart();
        }
    }
}

impl AlertSink for AlertClient {
    fn send_alert(&self, message: &str, caller_tag: &str) -> GreenhouseResult<()> {
        let Some((api_key, phone)) = self.preflight() else {
            return Err(GreenhouseError::Alert("not in station mode or missing credentials".into()));
        };
        let body = AlertBody { api_key: &api_key, phone: &phone, msg: message };
        let json = serde_json::to_string(&body)?;
        log::info!("{caller_tag} sending alert");
        let ok = self.post(&json)?;
        if ok {
            Ok(())
        } else {
            Err(GreenhouseError::Alert("server responded other than OK".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        fail_until: usize,
    }

    impl AlertSink for CountingSink {
        fn send_alert(&self, _message: &str, _caller_tag: &str) -> GreenhouseResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.fail_until {
                Ok(())
            } else {
                Err(GreenhouseError::Alert("simulated failure".into()))
            }
        }
    }

    #[test]
    fn scenario_s6_alert_dedup_on_trip_and_clear() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_until: 0 };
        let mut dispatch = AlertDispatch::new();
        dispatch.trip(&sink, "(TEST)", "trip 1");
        dispatch.trip(&sink, "(TEST)", "trip 2"); // should not re-send
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        dispatch.clear();
        dispatch.trip(&sink, "(TEST)", "trip 3"); // cleared, may send again
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sens_down_pkg_sends_once_per_transition() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_until: 0 };
        let mut pkg = SensDownPkg::new("(TEMPHUM)");
        // 3 consecutive bad reads -> DOWN alert exactly once.
        for _ in 0..3 {
            pkg.monitor(&sink, 0.0);
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        pkg.monitor(&sink, 0.0); // still down, no re-alert
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        // 3 consecutive good reads -> UP alert exactly once.
        for _ in 0..3 {
            pkg.monitor(&sink, 1.0);
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn send_failure_suppressed_after_retries() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_until: 100 };
        let mut dispatch = AlertDispatch::new();
        dispatch.trip(&sink, "(TEST)", "msg"); // fail 1
        dispatch.trip(&sink, "(TEST)", "msg"); // fail 2... but last_sent unset so retries each trip() call
        dispatch.trip(&sink, "(TEST)", "msg"); // fail 3 -> suppressed
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        dispatch.trip(&sink, "(TEST)", "msg"); // suppressed, no call
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }
}
