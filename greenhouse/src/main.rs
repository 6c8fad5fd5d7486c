//! Process entry point (C14 task runtime + A1/A3 config/CLI).
//!
//! Wires the hardware-independent `greenhouse-core` components to the
//! simulated collaborators in [`simulate`] and drives them from a small set
//! of tokio tasks, mirroring how `horus_manager`'s own `main.rs` parses a
//! `clap` CLI and then hands off to a `tokio::runtime` for anything
//! networked (`horus_manager/src/main.rs`'s monitor subcommand does the
//! same `Runtime::new().block_on(...)` handoff around a blocking web
//! server).

mod config;
mod logging;
mod simulate;
mod store_backend;

use chrono::{Datelike, Timelike};
use clap::Parser;
use colored::Colorize;
use config::Config;
use greenhouse_core::alert::AlertClient;
use greenhouse_core::bounds::Condition;
use greenhouse_core::clock::Clock;
use greenhouse_core::collaborators::{NetworkStatus, StackMonitor};
use greenhouse_core::heartbeat::{Heartbeat, RestartHandler};
use greenhouse_core::light::Light;
use greenhouse_core::message_log::MessageLog;
use greenhouse_core::relay::{ClientId, Relay};
use greenhouse_core::report::Report;
use greenhouse_core::settings::{Settings, TOTAL_RELAYS};
use greenhouse_core::soil::{Soil, SOIL_SENSORS};
use greenhouse_core::store::Store;
use greenhouse_core::temp_hum::TempHum;
use simulate::{ConfigCredentials, ProcessRestarter, SimConfig, SimNetwork, SimRelayDriver, SimStackMonitor};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use store_backend::FileBackend;

const RELAY_TAGS: [&str; TOTAL_RELAYS] = ["(RELAY1)", "(RELAY2)", "(RELAY3)", "(RELAY4)"];

#[derive(Parser)]
#[command(name = "greenhouse")]
#[command(about = "Autonomous greenhouse controller")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "greenhouse.toml")]
    config: PathBuf,

    /// Minimum severity printed to the terminal and folded into the log ring.
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,

    /// Probability (0.0-1.0) that a simulated driver read fails on any given
    /// sample, for exercising the error/alert paths in a demo run.
    #[arg(long, default_value_t = 0.0)]
    fault_probability: f32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;

    let clock = Arc::new(Clock::new());
    let now = chrono::Local::now();
    clock.calibrate(now.num_seconds_from_midnight());

    let message_log = Arc::new(MessageLog::new(clock.clone(), config.msg_clear_seconds));
    logging::init(message_log.clone(), cli.log_level);

    log::info!(
        "(MAIN) starting greenhouse controller id={} fw={}",
        config.device.id,
        config.device.firmware_version
    );

    let store = Store::open("settings", Box::new(FileBackend::open(&config.store_path)))?;

    let relays: Vec<Arc<Relay>> = (0..TOTAL_RELAYS as u8)
        .map(|i| Arc::new(Relay::new(i, RELAY_TAGS[i as usize], Box::new(SimRelayDriver::new(RELAY_TAGS[i as usize])))))
        .collect();

    let temp_hum = Arc::new(TempHum::new());
    let light = Arc::new(Light::new());
    let soil = Arc::new(Soil::new());

    seed_from_config(&config, &temp_hum, &light, &soil, &relays)?;

    let network = Arc::new(SimNetwork::new(&config.device.id));
    let credentials = Arc::new(ConfigCredentials::new(config.credentials.api_key.clone(), config.credentials.phone.clone()));
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let process = Arc::new(ProcessRestarter::new(shutdown_requested.clone()));

    let settings = Arc::new(Settings::new(
        store,
        temp_hum.clone(),
        light.clone(),
        soil.clone(),
        relays.clone(),
        process,
        message_log.clone(),
        clock.clone(),
    ));
    // Config seeds the bounds above; a prior run's save (if any) now takes
    // precedence, matching `config.rs`'s documented "config file is what it
    // runs with until the first save" handoff.
    settings.load()?;

    let heartbeat = Arc::new(Heartbeat::new(settings.clone() as Arc<dyn RestartHandler>));

    let alert = Arc::new(AlertClient::new(
        config.network.alert_endpoint.clone(),
        heartbeat.clone(),
        network.clone() as Arc<dyn greenhouse_core::collaborators::NetworkStatus>,
        credentials as Arc<dyn greenhouse_core::collaborators::CredentialProvider>,
    )?);

    let firmware_version: &'static str = Box::leak(config.device.firmware_version.clone().into_boxed_str());
    let device_id: &'static str = Box::leak(config.device.id.clone().into_boxed_str());
    let report = Arc::new(Report::new(clock.clone(), firmware_version, device_id));
    if let Some(clear_time) = config.report.clear_time {
        report.set_timer(clear_time)?;
    }

    let net_hb = heartbeat.register("(NET)", 10)?;
    let temp_hum_hb = heartbeat.register("(TEMPHUM)", 10)?;
    let light_hb = heartbeat.register("(LIGHT)", 10)?;
    let soil_hb = heartbeat.register("(SOIL)", 10)?;
    let routine_hb = heartbeat.register("(ROUTINE)", 5)?;

    let scheduler_clients: Vec<ClientId> = relays
        .iter()
        .map(|r| r.acquire("(SCHEDULER)"))
        .collect::<greenhouse_core::GreenhouseResult<_>>()?;

    let sim_cfg = Arc::new(SimConfig { fault_probability: cli.fault_probability, ..Default::default() });
    let stack_monitor = Arc::new(SimStackMonitor);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(net_task(network.clone(), heartbeat.clone(), net_hb, config.network.heartbeat_udp_target.clone(), stack_monitor.clone())));
    tasks.push(tokio::spawn(temp_hum_task(temp_hum.clone(), alert.clone(), heartbeat.clone(), temp_hum_hb, sim_cfg.clone(), stack_monitor.clone())));
    tasks.push(tokio::spawn(light_task(light.clone(), clock.clone(), heartbeat.clone(), light_hb, sim_cfg.clone(), stack_monitor.clone())));
    tasks.push(tokio::spawn(soil_task(soil.clone(), alert.clone(), heartbeat.clone(), soil_hb, sim_cfg, stack_monitor.clone())));
    tasks.push(tokio::spawn(routine_task(
        clock.clone(),
        relays,
        scheduler_clients,
        light.clone(),
        temp_hum.clone(),
        soil.clone(),
        report,
        alert.clone(),
        message_log,
        settings.clone(),
        heartbeat.clone(),
        routine_hb,
        config.auto_save_frq_seconds,
        stack_monitor,
    )));
    tasks.push(tokio::spawn(heartbeat_task(heartbeat)));

    tokio::signal::ctrl_c().await.ok();
    log::info!("(MAIN) shutdown requested, saving settings");
    if let Err(e) = settings.save() {
        log::error!("(MAIN) save on shutdown failed: {e}");
    }
    for task in tasks {
        task.abort();
    }
    Ok(())
}

/// Applies `config`'s bound/timer settings to the freshly-constructed
/// components. A device with no store entries yet runs off these values
/// until the first `Settings::save`; `Settings::load` (called right after
/// this) lets a prior run's persisted snapshot override them.
fn seed_from_config(
    config: &Config,
    temp_hum: &Arc<TempHum>,
    light: &Arc<Light>,
    soil: &Arc<Soil>,
    relays: &[Arc<Relay>],
) -> greenhouse_core::GreenhouseResult<()> {
    if config.temp_hum.temp_relay.condition != Condition::None {
        let client = relays[0].acquire("(TEMPHUM)")?;
        temp_hum.attach_temp_relay(relays[0].clone(), client, config.temp_hum.temp_relay.condition, config.temp_hum.temp_relay.trip_val)?;
    }
    if config.temp_hum.hum_relay.condition != Condition::None {
        let client = relays[1].acquire("(TEMPHUM)")?;
        temp_hum.attach_hum_relay(relays[1].clone(), client, config.temp_hum.hum_relay.condition, config.temp_hum.hum_relay.trip_val)?;
    }
    temp_hum.set_temp_alert(config.temp_hum.temp_alert_enabled, config.temp_hum.temp_alert.condition, config.temp_hum.temp_alert.trip_val)?;
    temp_hum.set_hum_alert(config.temp_hum.hum_alert_enabled, config.temp_hum.hum_alert.condition, config.temp_hum.hum_alert.trip_val)?;

    for i in 0..SOIL_SENSORS {
        soil.set_channel_bound(i, config.soil[i].enabled, config.soil[i].bound.condition, config.soil[i].bound.trip_val)?;
    }

    light.set_dark_val(config.light.dark_val)?;
    if config.light.relay.condition != Condition::None {
        let client = relays[2].acquire("(LIGHT)")?;
        light.attach_relay(relays[2].clone(), client, config.light.relay.condition, config.light.relay.trip_val)?;
    }

    for (i, relay) in relays.iter().enumerate().take(TOTAL_RELAYS) {
        let timer = &config.relays[i];
        relay.set_timer(timer.on_time, timer.off_time, timer.weekdays)?;
    }
    Ok(())
}

async fn temp_hum_task(
    temp_hum: Arc<TempHum>,
    alert: Arc<AlertClient>,
    heartbeat: Arc<Heartbeat>,
    slot: greenhouse_core::heartbeat::SlotId,
    sim_cfg: Arc<SimConfig>,
    stack_monitor: Arc<SimStackMonitor>,
) {
    let mut driver = simulate::SimTempHumDriver::new(sim_cfg);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = temp_hum.sample(&mut driver, alert.as_ref()) {
            log::error!("(TEMPHUM) sample failed: {e}");
        }
        if let Err(e) = temp_hum.monitor_health(alert.as_ref()) {
            log::error!("(TEMPHUM) health monitor failed: {e}");
        }
        greenhouse_core::runtime::check_high_water_mark("(TEMPHUM)", stack_monitor.high_water_mark("(TEMPHUM)"));
        let _ = heartbeat.roger_up(slot, 10);
    }
}

async fn light_task(
    light: Arc<Light>,
    clock: Arc<Clock>,
    heartbeat: Arc<Heartbeat>,
    slot: greenhouse_core::heartbeat::SlotId,
    sim_cfg: Arc<SimConfig>,
    stack_monitor: Arc<SimStackMonitor>,
) {
    let mut spectral_driver = simulate::SimSpectralDriver::new(sim_cfg.clone());
    let mut photo_driver = simulate::SimPhotoDriver::new(sim_cfg);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = light.sample_spectrum(&mut spectral_driver) {
            log::error!("(LIGHT) spectral sample failed: {e}");
        }
        if let Err(e) = light.sample_photo(&mut photo_driver, clock.seconds()) {
            log::error!("(LIGHT) photo sample failed: {e}");
        }
        greenhouse_core::runtime::check_high_water_mark("(LIGHT)", stack_monitor.high_water_mark("(LIGHT)"));
        let _ = heartbeat.roger_up(slot, 10);
    }
}

/// The 1Hz net task (C14): polls station details and sends them to the
/// remote heartbeat collector, and drifts the simulated RSSI so a demo run
/// isn't a dead constant. WiFi lifecycle management (WAP/setup flow) stays
/// out of scope; this task only surfaces the already-connected station's
/// status.
async fn net_task(
    network: Arc<SimNetwork>,
    heartbeat: Arc<Heartbeat>,
    slot: greenhouse_core::heartbeat::SlotId,
    heartbeat_udp_target: String,
    stack_monitor: Arc<SimStackMonitor>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        network.jitter();
        if let Some(details) = network.station_details() {
            heartbeat.ping_remote(&heartbeat_udp_target, &details);
        }
        greenhouse_core::runtime::check_high_water_mark("(NET)", stack_monitor.high_water_mark("(NET)"));
        let _ = heartbeat.roger_up(slot, 10);
    }
}

async fn soil_task(
    soil: Arc<Soil>,
    alert: Arc<AlertClient>,
    heartbeat: Arc<Heartbeat>,
    slot: greenhouse_core::heartbeat::SlotId,
    sim_cfg: Arc<SimConfig>,
    stack_monitor: Arc<SimStackMonitor>,
) {
    let mut driver = simulate::SimSoilDriver::new(sim_cfg);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = soil.sample(&mut driver, alert.as_ref()) {
            log::error!("(SOIL) sample failed: {e}");
        }
        greenhouse_core::runtime::check_high_water_mark("(SOIL)", stack_monitor.high_water_mark("(SOIL)"));
        let _ = heartbeat.roger_up(slot, 10);
    }
}

/// The 1Hz routine task (C14): relay timer scheduling, the hourly
/// trend/report cycle, the transient display message check, and periodic
/// autosave. Bundled into a single task because every step is cheap and
/// ordering between them doesn't matter within a second.
#[allow(clippy::too_many_arguments)]
async fn routine_task(
    clock: Arc<Clock>,
    relays: Vec<Arc<Relay>>,
    scheduler_clients: Vec<ClientId>,
    light: Arc<Light>,
    temp_hum: Arc<TempHum>,
    soil: Arc<Soil>,
    report: Arc<Report>,
    alert: Arc<AlertClient>,
    message_log: Arc<MessageLog>,
    settings: Arc<Settings>,
    heartbeat: Arc<Heartbeat>,
    slot: greenhouse_core::heartbeat::SlotId,
    auto_save_frq_seconds: u64,
    stack_monitor: Arc<SimStackMonitor>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_hour: Option<u8> = None;
    let mut seconds_since_save: u64 = 0;

    loop {
        ticker.tick().await;
        let wall = clock.wall();
        let weekday = chrono::Local::now().weekday().num_days_from_sunday() as u8;

        for (relay, client) in relays.iter().zip(scheduler_clients.iter()) {
            if let Err(e) = relay.manage_timer(wall, weekday, *client) {
                log::error!("(ROUTINE) relay {} timer management failed: {e}", relay.index());
            }
        }

        if last_hour != Some(wall.hour) {
            if let Err(e) = light.record_hourly_trend() {
                log::error!("(ROUTINE) hourly trend recording failed: {e}");
            }
            last_hour = Some(wall.hour);
        }

        if let Err(e) = report.manage(wall, &temp_hum, &light, &soil, &relays, &alert) {
            log::error!("(ROUTINE) report management failed: {e}");
        }

        message_log.display_message_check();

        seconds_since_save += 1;
        if seconds_since_save >= auto_save_frq_seconds {
            seconds_since_save = 0;
            if let Err(e) = settings.save() {
                log::error!("(ROUTINE) autosave failed: {e}");
            }
        }

        greenhouse_core::runtime::check_high_water_mark("(ROUTINE)", stack_monitor.high_water_mark("(ROUTINE)"));
        let _ = heartbeat.roger_up(slot, 5);
    }
}

async fn heartbeat_task(heartbeat: Arc<Heartbeat>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = heartbeat.manage() {
            log::error!("(HEARTBEAT) manage failed: {e}");
        }
    }
}
