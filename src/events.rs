//! Sensor event vocabulary shared by the dispatcher, alert machine,
//! noise controller and status record.
//!
//! ```text
//!  INT (0x03 & 0x0F) ──▶ InterruptReason ──┬─▶ Lightning ─▶ LightningEvent ─▶ AlertLevel?
//!                                          ├─▶ Disturber ─▶ NoiseMode::High
//!                                          ├─▶ NoiseHigh ─▶ NoiseMode::Critical
//!                                          └─▶ Unknown   ─▶ log only
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

/// Decoded low nibble of the interrupt register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterruptReason {
    NoiseHigh,
    Disturber,
    Lightning,
    /// Any other nibble value.  Logged, never acted on.
    Unknown(u8),
}

impl InterruptReason {
    pub const NOISE_HIGH: u8 = 0x01;
    pub const DISTURBER: u8 = 0x04;
    pub const LIGHTNING: u8 = 0x08;

    /// Decode the raw INT register; only bits 3:0 are significant.
    pub const fn from_register(raw: u8) -> Self {
        match raw & 0x0F {
            Self::NOISE_HIGH => Self::NoiseHigh,
            Self::DISTURBER => Self::Disturber,
            Self::LIGHTNING => Self::Lightning,
            other => Self::Unknown(other),
        }
    }
}

/// Estimated distance to the storm front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Km(u8),
    OutOfRange,
}

impl Distance {
    /// Register 0x07 value meaning "storm out of range".
    pub const OUT_OF_RANGE_RAW: u8 = 0x3F;

    pub const fn from_register(raw: u8) -> Self {
        match raw & 0x3F {
            Self::OUT_OF_RANGE_RAW => Self::OutOfRange,
            km => Self::Km(km),
        }
    }

    pub const fn km(self) -> Option<u8> {
        match self {
            Self::Km(km) => Some(km),
            Self::OutOfRange => None,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Km(km) => write!(f, "{km}km"),
            Self::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// Proximity zone; each has its own active flag and all-clear timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Adaptive noise-floor mode.  Ordered: `Normal < High < Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMode {
    #[default]
    Normal,
    High,
    Critical,
}

/// One recorded lightning strike.  Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightningEvent {
    /// Milliseconds since boot.
    pub uptime_ms: u64,
    /// Wall-clock seconds, when the clock is synced.
    pub unix_secs: Option<u64>,
    pub distance: Distance,
    /// Raw 20-bit energy figure (dimensionless).
    pub energy: u32,
    pub alert_sent: bool,
    pub alert_level: Option<AlertLevel>,
}
