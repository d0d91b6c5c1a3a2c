//! Message text for every notification the monitor sends.

use crate::events::AlertLevel;

use super::{NotificationMessage, Severity};

impl From<AlertLevel> for Severity {
    fn from(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Warning => Self::Warning,
            AlertLevel::Critical => Self::Critical,
        }
    }
}

/// New WARNING / CRITICAL alert.  `test` marks simulated strikes.
pub fn lightning_alert(level: AlertLevel, distance_km: u8, energy: u32, test: bool) -> NotificationMessage {
    let (headline, context) = match level {
        AlertLevel::Critical => (
            format!("CRITICAL: Lightning strike detected! Distance: {distance_km}km"),
            "Very close strike. Take shelter.",
        ),
        AlertLevel::Warning => (
            format!("WARNING: Lightning detected. Distance: {distance_km}km"),
            "Activity in the area. Be prepared.",
        ),
    };
    let text = if test { format!("TEST {headline}") } else { headline };
    NotificationMessage::new(level.into(), text)
        .with_context(context)
        .with_strike(distance_km, energy)
}

/// Zone quiet for the full all-clear period.
pub fn all_clear(zone: AlertLevel, zone_distance_km: u8, minutes: u32) -> NotificationMessage {
    NotificationMessage::new(
        Severity::AllClear,
        format!("All Clear: No lightning detected within {zone_distance_km}km for {minutes} minutes."),
    )
    .with_context(format!("No strikes in {zone} zone for {minutes} min."))
}

pub fn info(text: impl Into<String>) -> NotificationMessage {
    NotificationMessage::new(Severity::Info, text)
}
