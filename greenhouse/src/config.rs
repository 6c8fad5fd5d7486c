//! TOML configuration loader (A1).
//!
//! Mirrors the persisted shapes of `greenhouse_core`'s snapshot types
//! directly (temp/hum/soil/light bound configs, relay timers) so the same
//! fields the settings saver (C13) later restores from the key/value store
//! are first seeded here at boot. A freshly-provisioned device has no store
//! entries yet; the config file is what it runs with until the first save.

use greenhouse_core::bounds::Condition;
use serde::Deserialize;
use std::path::Path;

fn default_condition() -> Condition {
    Condition::None
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub alert_endpoint: String,
    /// `host:port` a heartbeat UDP ping is fired at once per second
    /// (§4.4, §6.3). No default collector exists for a simulated run, so
    /// this defaults to a loopback address nothing is bound to; the send
    /// is fire-and-forget regardless.
    #[serde(default = "default_heartbeat_udp_target")]
    pub heartbeat_udp_target: String,
}

fn default_heartbeat_udp_target() -> String {
    "127.0.0.1:6969".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundConfig {
    #[serde(default = "default_condition")]
    pub condition: Condition,
    #[serde(default)]
    pub trip_val: f32,
}

impl Default for BoundConfig {
    fn default() -> Self {
        Self { condition: Condition::None, trip_val: 0.0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TempHumConfig {
    #[serde(default)]
    pub temp_relay: BoundConfig,
    #[serde(default)]
    pub hum_relay: BoundConfig,
    #[serde(default)]
    pub temp_alert_enabled: bool,
    #[serde(default)]
    pub temp_alert: BoundConfig,
    #[serde(default)]
    pub hum_alert_enabled: bool,
    #[serde(default)]
    pub hum_alert: BoundConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoilChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bound: BoundConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    #[serde(default)]
    pub relay: BoundConfig,
    #[serde(default = "default_dark_val")]
    pub dark_val: i32,
}

fn default_dark_val() -> i32 {
    greenhouse_core::light::DARK_VAL_DEFAULT
}

impl Default for LightConfig {
    fn default() -> Self {
        Self { relay: BoundConfig::default(), dark_val: default_dark_val() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayTimerConfig {
    pub on_time: Option<u32>,
    pub off_time: Option<u32>,
    #[serde(default)]
    pub weekdays: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    /// Seconds-of-day the daily averages clear; defaults to C12's own
    /// `MAX_SET_TIME` ceiling when unset.
    pub clear_time: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub temp_hum: TempHumConfig,
    #[serde(default)]
    pub soil: [SoilChannelConfig; greenhouse_core::soil::SOIL_SENSORS],
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub relays: [RelayTimerConfig; greenhouse_core::settings::TOTAL_RELAYS],
    #[serde(default)]
    pub report: ReportConfig,
    /// Path the JSON-file-backed store persists to across restarts.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Seconds between C13 autosaves (`AUTO_SAVE_FRQ`, §3).
    #[serde(default = "default_auto_save_frq")]
    pub auto_save_frq_seconds: u64,
    /// Seconds a transient display message lingers before C6 clears it.
    #[serde(default = "default_msg_clear_seconds")]
    pub msg_clear_seconds: u64,
}

fn default_store_path() -> String {
    "greenhouse-store.json".to_string()
}

fn default_auto_save_frq() -> u64 {
    300
}

fn default_msg_clear_seconds() -> u64 {
    10
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let cfg: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig { id: "greenhouse-sim".to_string(), firmware_version: env!("CARGO_PKG_VERSION").to_string() },
            network: NetworkConfig {
                alert_endpoint: "http://127.0.0.1:8080/alert".to_string(),
                heartbeat_udp_target: default_heartbeat_udp_target(),
            },
            credentials: CredentialsConfig::default(),
            temp_hum: TempHumConfig::default(),
            soil: Default::default(),
            light: LightConfig::default(),
            relays: Default::default(),
            report: ReportConfig::default(),
            store_path: default_store_path(),
            auto_save_frq_seconds: default_auto_save_frq(),
            msg_clear_seconds: default_msg_clear_seconds(),
        }
    }
}
