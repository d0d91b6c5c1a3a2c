//! Log-based notification sink.
//!
//! Implements [`NotificationSink`] by writing every payload to the
//! ESP-IDF logger (UART / USB-CDC in production).  Used when no webhook
//! is configured, and as the sink in host runs.

use log::{info, warn};

use crate::app::ports::NotificationSink;
use crate::error::NotifyError;
use crate::notify::{NotificationPayload, Severity};

/// Adapter that logs every notification to the serial console.
#[derive(Debug, Default)]
pub struct LogNotificationSink {
    delivered: u32,
}

impl LogNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u32 {
        self.delivered
    }
}

impl NotificationSink for LogNotificationSink {
    fn deliver(&mut self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let context = payload.context.as_deref().unwrap_or("");
        if payload.severity.is_high() {
            warn!("NOTIFY | {:?} | {} | {}", payload.severity, payload.text, context);
        } else {
            info!("NOTIFY | {:?} | {} | {}", payload.severity, payload.text, context);
        }
        if let (Some(km), Some(energy)) = (payload.distance_km, payload.energy) {
            info!("NOTIFY | strike distance={}km energy={}", km, energy);
        }
        if payload.severity == Severity::AllClear {
            info!("NOTIFY | zone cleared");
        }
        self.delivered += 1;
        Ok(())
    }
}
