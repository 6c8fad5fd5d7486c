//! External-collaborator contracts.
//!
//! Everything in this module is a trait: the WiFi/network lifecycle, the
//! credential provider, process restart, and the I²C/ADC device drivers
//! are all invoked only through these interfaces. `greenhouse-core` ships
//! no concrete implementation of any of them; the `greenhouse` binary
//! crate supplies simulated ones so the core is demonstrable without
//! hardware.

use crate::error::GreenhouseResult;

/// WiFi lifecycle state, mirroring `original_source/GHS/include/Network/NetConfig.hpp`'s
/// mode enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Wap,
    WapSetup,
    Station,
    None,
}

#[derive(Debug, Clone)]
pub struct StationDetails {
    pub ssid: String,
    pub ip: String,
    pub mdns: String,
    pub rssi: i32,
    pub heap_free: u32,
    pub status: String,
}

/// The network collaborator's contract (§6.1). Driven by its own task; the
/// core only ever reads its state.
pub trait NetworkStatus: Send + Sync {
    fn mode(&self) -> NetworkMode;
    fn is_active(&self) -> bool;
    fn station_details(&self) -> Option<StationDetails>;
}

/// Validated SMS/API credentials. Both fields are `None` until a real
/// value has been configured (§4.7: "refuses to run unless... valid
/// credentials exist").
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
    fn phone(&self) -> Option<String>;
}

/// The single process-restart primitive (§6.1). Only two call sites in the
/// whole core use this: heartbeat expiry and alert-cleanup exhaustion, both
/// via C13's `save_and_restart`.
pub trait ProcessControl: Send + Sync {
    fn restart_process(&self) -> !;
}

/// SHT3x-equivalent temperature/humidity reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShtValues {
    pub temp_c: f32,
    pub temp_f: f32,
    pub humidity: f32,
}

pub trait TempHumDriver: Send {
    fn read_all(&mut self) -> GreenhouseResult<ShtValues>;
}

/// AS7341-equivalent 10-channel spectral reading (counts).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralColor {
    pub f1_violet: u16,
    pub f2_indigo: u16,
    pub f3_blue: u16,
    pub f4_cyan: u16,
    pub f5_green: u16,
    pub f6_yellow: u16,
    pub f7_orange: u16,
    pub f8_red: u16,
    pub clear: u16,
    pub nir: u16,
}

pub trait SpectralDriver: Send {
    fn read_all(&mut self) -> GreenhouseResult<SpectralColor>;
}

/// Photoresistor (analog, 12-bit) driver contract.
pub trait PhotoDriver: Send {
    fn read_photo(&mut self) -> GreenhouseResult<i32>;
}

/// Four-channel soil ADC driver contract.
pub trait SoilAdcDriver: Send {
    fn read_all_channels(&mut self) -> GreenhouseResult<[i32; crate::soil::SOIL_SENSORS]>;
}

/// Per-task stack headroom, reported in the units the underlying runtime
/// uses natively (FreeRTOS reports words; a host-thread runtime can report
/// an analogous measure). Modeled as a trait for the same reason the I²C
/// drivers are: `greenhouse-core` only consumes the number, it never
/// measures a stack itself.
pub trait StackMonitor: Send + Sync {
    fn high_water_mark(&self, task_tag: &str) -> u32;
}
