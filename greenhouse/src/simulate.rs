//! Simulated collaborator implementations (§6.1).
//!
//! Grounded on the `SimulationMotorDriver`/`SimulationLidarDriver` pattern
//! in `horus_library/drivers/*/simulation.rs`: deterministic,
//! time-varying synthetic readings so the whole control core is
//! demonstrable without any physical I²C/ADC/GPIO hardware. Every type here
//! implements one of `greenhouse_core::collaborators`'s traits; nothing in
//! `greenhouse-core` itself knows these are fakes.

use greenhouse_core::collaborators::{
    CredentialProvider, NetworkMode, NetworkStatus, ProcessControl, PhotoDriver, ShtValues,
    SoilAdcDriver, SpectralColor, SpectralDriver, StackMonitor, StationDetails, TempHumDriver,
};
use greenhouse_core::error::{GreenhouseError, GreenhouseResult};
use greenhouse_core::relay::RelayDriver;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Drives a sine wave plus small noise around a configured baseline, with
/// an optional injected-failure probability so the error-handling paths
/// (§7) are actually exercised in a demo run.
pub struct SimConfig {
    pub base_temp_c: f32,
    pub base_humidity: f32,
    pub base_photo: i32,
    pub fault_probability: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { base_temp_c: 24.0, base_humidity: 55.0, base_photo: 800, fault_probability: 0.0 }
    }
}

fn maybe_fail(fault_probability: f32) -> bool {
    if fault_probability <= 0.0 {
        return false;
    }
    rand::random::<f32>() < fault_probability
}

/// Simulated SHT3x-equivalent driver (C9). Oscillates around `base_temp_c`
/// with a slow diurnal-looking sine wave.
pub struct SimTempHumDriver {
    tick: u64,
    cfg: Arc<SimConfig>,
}

impl SimTempHumDriver {
    pub fn new(cfg: Arc<SimConfig>) -> Self {
        Self { tick: 0, cfg }
    }
}

impl TempHumDriver for SimTempHumDriver {
    fn read_all(&mut self) -> GreenhouseResult<ShtValues> {
        self.tick += 1;
        if maybe_fail(self.cfg.fault_probability) {
            return Err(GreenhouseError::sensor("simulated SHT3x I2C timeout"));
        }
        let t = self.tick as f32 * 0.05;
        let temp_c = self.cfg.base_temp_c + t.sin() * 3.0;
        let humidity = (self.cfg.base_humidity + (t * 0.7).cos() * 8.0).clamp(0.0, 100.0);
        Ok(ShtValues { temp_c, temp_f: temp_c * 1.8 + 32.0, humidity })
    }
}

/// Simulated AS7341-equivalent spectral driver (C10).
pub struct SimSpectralDriver {
    tick: u64,
    cfg: Arc<SimConfig>,
}

impl SimSpectralDriver {
    pub fn new(cfg: Arc<SimConfig>) -> Self {
        Self { tick: 0, cfg }
    }
}

impl SpectralDriver for SimSpectralDriver {
    fn read_all(&mut self) -> GreenhouseResult<SpectralColor> {
        self.tick += 1;
        if maybe_fail(self.cfg.fault_probability) {
            return Err(GreenhouseError::sensor("simulated AS7341 I2C timeout"));
        }
        let t = self.tick as f32 * 0.05;
        let brightness = ((t.sin() + 1.0) * 0.5 * 2000.0) as u16;
        Ok(SpectralColor {
            f1_violet: brightness / 8,
            f2_indigo: brightness / 7,
            f3_blue: brightness / 6,
            f4_cyan: brightness / 5,
            f5_green: brightness / 4,
            f6_yellow: brightness / 3,
            f7_orange: brightness / 2,
            f8_red: brightness,
            clear: brightness * 2,
            nir: brightness / 2,
        })
    }
}

/// Simulated photoresistor driver (C10). Alternates between "light" and
/// "dark" on a slow period, matching the duration tracker's expectations.
pub struct SimPhotoDriver {
    tick: u64,
    cfg: Arc<SimConfig>,
}

impl SimPhotoDriver {
    pub fn new(cfg: Arc<SimConfig>) -> Self {
        Self { tick: 0, cfg }
    }
}

impl PhotoDriver for SimPhotoDriver {
    fn read_photo(&mut self) -> GreenhouseResult<i32> {
        self.tick += 1;
        if maybe_fail(self.cfg.fault_probability) {
            return Err(GreenhouseError::sensor("simulated photoresistor ADC fault"));
        }
        let t = self.tick as f32 * 0.01;
        let value = self.cfg.base_photo as f32 + t.sin() * 600.0;
        Ok(value.clamp(greenhouse_core::light::PHOTO_MIN as f32, greenhouse_core::light::PHOTO_MAX as f32) as i32)
    }
}

/// Simulated four-channel soil ADC driver (C11).
pub struct SimSoilDriver {
    tick: u64,
    cfg: Arc<SimConfig>,
}

impl SimSoilDriver {
    pub fn new(cfg: Arc<SimConfig>) -> Self {
        Self { tick: 0, cfg }
    }
}

impl SoilAdcDriver for SimSoilDriver {
    fn read_all_channels(&mut self) -> GreenhouseResult<[i32; greenhouse_core::soil::SOIL_SENSORS]> {
        self.tick += 1;
        if maybe_fail(self.cfg.fault_probability) {
            return Err(GreenhouseError::sensor("simulated soil ADC fault"));
        }
        let t = self.tick as f32 * 0.02;
        Ok(std::array::from_fn(|i| {
            let phase = i as f32 * 0.8;
            (2000.0 + (t + phase).sin() * 400.0) as i32
        }))
    }
}

/// Simulated GPIO relay driver: just tracks the commanded state so a demo
/// run can log transitions without real hardware. Relay physical state
/// itself is still tracked by `greenhouse_core::relay::Relay`; this driver
/// is only the actuation boundary.
pub struct SimRelayDriver {
    tag: &'static str,
}

impl SimRelayDriver {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl RelayDriver for SimRelayDriver {
    fn energize(&mut self, relay_index: u8, on: bool) -> GreenhouseResult<()> {
        log::info!("{} relay {relay_index} GPIO -> {}", self.tag, if on { "HIGH" } else { "LOW" });
        Ok(())
    }
}

/// Simulated WiFi station, permanently "up" in station mode. This
/// reimplementation has no WAP/setup flow to demonstrate, so it starts
/// directly in the steady state the real collaborator eventually reaches.
pub struct SimNetwork {
    mdns: String,
    rssi: AtomicU64,
}

impl SimNetwork {
    pub fn new(device_id: &str) -> Self {
        Self { mdns: format!("{device_id}.local"), rssi: AtomicU64::new(60) }
    }

    /// Called periodically by the net task to make the RSSI drift a
    /// little, so the report's station details aren't a dead constant.
    pub fn jitter(&self) {
        let delta = if rand::random::<bool>() { 1 } else { -1 };
        let current = self.rssi.load(Ordering::Relaxed) as i64;
        let next = (current + delta).clamp(30, 90);
        self.rssi.store(next as u64, Ordering::Relaxed);
    }
}

impl NetworkStatus for SimNetwork {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Station
    }

    fn is_active(&self) -> bool {
        true
    }

    fn station_details(&self) -> Option<StationDetails> {
        Some(StationDetails {
            ssid: "greenhouse-lan".to_string(),
            ip: "192.168.1.50".to_string(),
            mdns: self.mdns.clone(),
            rssi: -(self.rssi.load(Ordering::Relaxed) as i32),
            heap_free: 120_000,
            status: "connected".to_string(),
        })
    }
}

/// Reads credentials straight from the loaded config (§6.1 credential
/// provider). A device with no `[credentials]` section simply never has
/// valid values, and C8 refuses to send anything (§4.7); the same
/// behavior the original has before the setup pages are filled in.
pub struct ConfigCredentials {
    api_key: Option<String>,
    phone: Option<String>,
}

impl ConfigCredentials {
    pub fn new(api_key: Option<String>, phone: Option<String>) -> Self {
        Self { api_key, phone }
    }
}

impl CredentialProvider for ConfigCredentials {
    fn api_key(&self) -> Option<String> {
        self.api_key.clone()
    }

    fn phone(&self) -> Option<String> {
        self.phone.clone()
    }
}

/// The single process-restart primitive (§6.1). A real device reboots;
/// this host process re-execs itself via `exec`, falling back to a clean
/// `std::process::exit` with a distinct restart-request status code that
/// a supervising process (systemd, docker `--restart`) can catch.
pub struct ProcessRestarter {
    shutdown_requested: Arc<AtomicBool>,
}

impl ProcessRestarter {
    pub const RESTART_EXIT_CODE: i32 = 42;

    pub fn new(shutdown_requested: Arc<AtomicBool>) -> Self {
        Self { shutdown_requested }
    }
}

impl ProcessControl for ProcessRestarter {
    fn restart_process(&self) -> ! {
        log::error!("(PROCESS) restart requested, exiting with code {}", Self::RESTART_EXIT_CODE);
        self.shutdown_requested.store(true, Ordering::SeqCst);
        std::process::exit(Self::RESTART_EXIT_CODE);
    }
}

/// Stands in for `uxTaskGetStackHighWaterMark`: a host thread has no fixed
/// stack budget to report, so this reports a comfortably high, slightly
/// jittered constant per task rather than a real measurement. Exists purely
/// so the high-water-mark check in each task loop has something to call.
pub struct SimStackMonitor;

impl StackMonitor for SimStackMonitor {
    fn high_water_mark(&self, _task_tag: &str) -> u32 {
        4096 + (rand::random::<u32>() % 256)
    }
}
