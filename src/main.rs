//! StrikeGuard firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EspSpiFactory     GpioInterruptLine   SystemClock             │
//! │  (BusFactory)      (InterruptLine)     (Clock)                 │
//! │  WebhookSink / LogNotificationSink (NotificationSink)          │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  Monitor: Supervisor · IRQ dispatch · Alerts · Noise   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::EspSntp;
use log::{error, info, warn};

use strikeguard::adapters::log_sink::LogNotificationSink;
use strikeguard::adapters::spi_bus::EspSpiFactory;
use strikeguard::adapters::time::SystemClock;
use strikeguard::adapters::webhook::WebhookSink;
use strikeguard::adapters::wifi::{WifiCredentials, connect_station};
use strikeguard::drivers::irq::GpioInterruptLine;
use strikeguard::notify::DeliveryPolicy;
use strikeguard::{Monitor, MonitorConfig};

const STATUS_LOG_PERIOD: Duration = Duration::from_secs(60);

fn load_config() -> Result<MonitorConfig> {
    match option_env!("STRIKEGUARD_CONFIG") {
        Some(json) => {
            let config = MonitorConfig::from_json(json).context("embedded STRIKEGUARD_CONFIG")?;
            info!("Config loaded from build-time JSON");
            Ok(config)
        }
        None => {
            info!("No embedded config, using defaults");
            Ok(MonitorConfig::default())
        }
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  StrikeGuard v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = load_config()?;
    if config.system.debug {
        warn!("Running in DEBUG mode; test alerts are enabled");
    }

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take().ok();

    // ── 3. Network (only needed for the webhook) ──────────────
    let webhook_url = config
        .notify
        .webhook_url
        .clone()
        .filter(|_| config.notify.enabled);
    let mut _wifi = None;
    let mut _sntp = None;
    if webhook_url.is_some() {
        let creds = WifiCredentials::new(
            option_env!("STRIKEGUARD_WIFI_SSID").unwrap_or(""),
            option_env!("STRIKEGUARD_WIFI_PASS").unwrap_or(""),
        );
        match creds {
            Ok(creds) => match connect_station(peripherals.modem, sysloop.clone(), nvs, &creds) {
                Ok(wifi) => {
                    _wifi = Some(wifi);
                    _sntp = EspSntp::new_default()
                        .inspect_err(|e| warn!("SNTP start failed: {:?}", e))
                        .ok();
                }
                Err(e) => error!("WiFi unavailable ({}); notifications will fail", e),
            },
            Err(e) => error!("WiFi credentials rejected: {}", e),
        }
    }

    // ── 4. Hardware adapters ──────────────────────────────────
    let factory = EspSpiFactory::new(
        peripherals.spi2,
        config.sensor.cs_gpio,
        config.sensor.spi_baudrate_hz,
    )?;
    let irq = Arc::new(GpioInterruptLine::new(config.sensor.irq_gpio)?);
    let clock = Arc::new(SystemClock::new());

    // ── 5. Monitor ────────────────────────────────────────────
    let monitor = Monitor::new(config, factory, irq, clock)?;
    match webhook_url {
        Some(url) => {
            info!("Notifications via webhook");
            monitor.start_notifications(WebhookSink::new(url), DeliveryPolicy::default())?;
        }
        None => monitor.start_notifications(LogNotificationSink::new(), DeliveryPolicy::default())?,
    }
    monitor.auto_start()?;

    // ── 6. Status loop ────────────────────────────────────────
    loop {
        std::thread::sleep(STATUS_LOG_PERIOD);
        let snapshot = monitor.status_snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!("STATUS | {}", json),
            Err(e) => warn!("STATUS | encode failed: {}", e),
        }
    }
}
