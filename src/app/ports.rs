//! Port traits — the boundary between the monitor core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Monitor (domain)
//! ```
//!
//! Driven adapters (SPI bus factory, IRQ line, clock, notification
//! transport) implement these traits.  The [`Monitor`](super::service::Monitor)
//! consumes them via generics and trait objects, so the domain core never
//! touches ESP-IDF directly and every path runs on the host in tests.

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::spi::SpiDevice;

use crate::error::{NotifyError, Result};
use crate::notify::NotificationPayload;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic and wall-clock time source.
pub trait Clock: Send + Sync {
    /// Time since boot.  Never goes backwards.
    fn uptime(&self) -> Duration;

    /// Seconds since the Unix epoch; `None` until the clock is synced.
    fn unix_secs(&self) -> Option<u64>;
}

// ───────────────────────────────────────────────────────────────
// Interrupt line port (hardware edge → domain)
// ───────────────────────────────────────────────────────────────

/// Callback run once per falling edge, outside ISR context.
pub type EdgeHandler = Arc<dyn Fn() + Send + Sync>;

/// The sensor's IRQ GPIO.
///
/// Implementations only ever touch their own pin.
pub trait InterruptLine: Send + Sync {
    /// GPIO number, for logs and status.
    fn pin(&self) -> u8;

    /// Route falling edges to `handler`, replacing any previous handler.
    fn attach(&self, handler: EdgeHandler) -> Result<()>;

    /// Stop delivering edges.  The pin stays configured.
    fn detach(&self);

    fn is_attached(&self) -> bool;

    /// Detach and return the pin to a plain pulled-up input.
    fn release(&self);
}

// ───────────────────────────────────────────────────────────────
// Bus factory port
// ───────────────────────────────────────────────────────────────

/// Opens a fresh SPI device handle for each initialisation attempt.
pub trait BusFactory: Send + Sync + 'static {
    type Bus: SpiDevice + Send + 'static;

    fn open(&self) -> Result<Self::Bus>;
}

// ───────────────────────────────────────────────────────────────
// Notification sink port (domain → webhook / log)
// ───────────────────────────────────────────────────────────────

/// The outbound transport call.  Called only from the notification worker.
pub trait NotificationSink: Send {
    fn deliver(&mut self, payload: &NotificationPayload) -> core::result::Result<(), NotifyError>;
}
