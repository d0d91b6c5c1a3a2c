//! Monitor configuration parameters
//!
//! All tunable parameters for the StrikeGuard monitor.  The document is
//! produced by an external loader (embedded JSON, provisioning tool) and
//! consumed read-only by the core.  Invalid values are rejected by
//! [`MonitorConfig::validate`], never silently clamped.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pins;
use crate::status::DISTURBER_CAP;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sensor: SensorConfig,
    pub alerts: AlertConfig,
    pub noise: NoiseConfig,
    pub notify: NotifyConfig,
    pub system: SystemConfig,
}

/// Sensitivity tier; selects spike rejection, noise floor and watchdog width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// SPI host peripheral index (SPI2 = 2).
    pub spi_host: u8,
    /// Chip-select GPIO.
    pub cs_gpio: u8,
    /// IRQ GPIO (active-low, falling edge).
    pub irq_gpio: u8,
    /// SPI clock in Hz.
    pub spi_baudrate_hz: u32,
    /// Indoor AFE gain when true, outdoor otherwise.
    pub indoor: bool,
    pub sensitivity: Sensitivity,
    /// Start monitoring immediately after boot.
    pub auto_start: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            spi_host: pins::SPI_HOST,
            cs_gpio: pins::AS3935_CS_GPIO,
            irq_gpio: pins::AS3935_IRQ_GPIO,
            spi_baudrate_hz: 2_000_000,
            indoor: false,
            sensitivity: Sensitivity::Medium,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Strikes at or closer than this raise CRITICAL (km).
    pub critical_distance_km: u8,
    /// Strikes at or closer than this raise WARNING (km).
    pub warning_distance_km: u8,
    /// Strikes below this energy are recorded but never alarmed.
    pub energy_threshold: u32,
    /// Quiet period before an all-clear is sent (minutes).
    pub all_clear_minutes: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_distance_km: 10,
            warning_distance_km: 30,
            energy_threshold: 100_000,
            all_clear_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Adaptive noise-floor handling on/off.
    pub enabled: bool,
    /// Disturbers within the window that trigger HIGH mode.
    pub event_threshold: u16,
    pub time_window_secs: u32,
    pub revert_delay_minutes: u32,
    /// NF_LEV written when entering HIGH mode (0–7).
    pub raised_noise_floor_level: u8,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_threshold: 15,
            time_window_secs: 120,
            revert_delay_minutes: 10,
            raised_noise_floor_level: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Master switch for outbound notifications.
    pub enabled: bool,
    /// Incoming-webhook URL for the HTTP sink; `None` logs only.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Enables test alerts.
    pub debug: bool,
    /// Let the watchdog restart a dead monitoring thread.
    pub auto_restart: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug: false,
            auto_restart: true,
        }
    }
}

impl MonitorConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed JSON document"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let a = &self.alerts;
        if a.critical_distance_km == 0 {
            return Err(Error::Config("critical distance must be > 0"));
        }
        if a.warning_distance_km > 63 {
            return Err(Error::Config("warning distance beyond sensor range (63 km)"));
        }
        if a.warning_distance_km <= a.critical_distance_km {
            return Err(Error::Config("warning distance must exceed critical distance"));
        }
        if a.energy_threshold >= 1 << 21 {
            return Err(Error::Config("energy threshold beyond 21-bit range"));
        }
        if a.all_clear_minutes == 0 {
            return Err(Error::Config("all-clear timer must be > 0"));
        }

        let n = &self.noise;
        if n.raised_noise_floor_level > 7 {
            return Err(Error::Config("raised noise floor must be 0..=7"));
        }
        if n.event_threshold == 0 || n.time_window_secs == 0 {
            return Err(Error::Config("noise threshold and window must be > 0"));
        }
        if usize::from(n.event_threshold) > DISTURBER_CAP {
            return Err(Error::Config("noise threshold exceeds the disturber window capacity"));
        }
        if n.revert_delay_minutes == 0 {
            return Err(Error::Config("noise revert delay must be > 0"));
        }

        if self.sensor.spi_baudrate_hz == 0 || self.sensor.spi_baudrate_hz > 2_000_000 {
            return Err(Error::Config("SPI clock must be 1..=2 MHz"));
        }
        Ok(())
    }
}
