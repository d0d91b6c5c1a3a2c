//! Inbound commands to the monitor.
//!
//! These represent actions requested by the outside world (status page,
//! serial console, remote control) that the
//! [`Monitor`](super::service::Monitor) interprets and acts upon.

use serde::Deserialize;

use crate::events::AlertLevel;

/// Commands that external adapters can send into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MonitorCommand {
    /// Start the monitoring loop and watchdog.
    Start,

    /// Stop monitoring and release the sensor.
    Stop,

    /// Clear both alert zones and revert the noise floor.
    ResetAlerts,

    /// Simulate a strike of the given level (debug builds of the config only).
    TestAlert { level: AlertLevel },

    /// Send an INFO notification through the normal pipeline.
    TestNotification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_json() {
        let c: MonitorCommand = serde_json::from_str(r#"{"command":"reset_alerts"}"#).unwrap();
        assert_eq!(c, MonitorCommand::ResetAlerts);

        let c: MonitorCommand =
            serde_json::from_str(r#"{"command":"test_alert","level":"critical"}"#).unwrap();
        assert_eq!(c, MonitorCommand::TestAlert { level: AlertLevel::Critical });
    }
}
