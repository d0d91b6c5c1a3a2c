//! Outbound notifications.
//!
//! ```text
//!  IRQ path / timers ──try_push──▶ NotificationQueue (cap 100) ──▶ worker ──▶ NotificationSink
//!        (never blocks)             severity admission             retry + rate limit
//! ```
//!
//! Enqueue never blocks, so interrupt-time code is decoupled from network
//! latency.  A single worker serialises every transport call.

pub mod format;
pub mod queue;
pub mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::app::ports::{Clock, NotificationSink};
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::Result;

pub use queue::{Admission, NotificationQueue, QUEUE_CAPACITY, QueueStats, Received};
pub use worker::{DeliveryPolicy, WorkerStats};

/// Message severity.  Declaration order is the admission rank used when
/// the queue is full: `Info < AllClear < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    AllClear,
    Warning,
    Critical,
}

impl Severity {
    /// May evict queued messages when the queue is full.
    pub const fn is_high(self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

/// One queued notification.  Consumed exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub severity: Severity,
    pub text: String,
    /// Second line shown under the headline.
    pub context: Option<String>,
    pub distance_km: Option<u8>,
    pub energy: Option<u32>,
    /// Uptime when the message entered the queue.
    pub enqueued_at: Duration,
    pub unix_secs: Option<u64>,
}

impl NotificationMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            context: None,
            distance_km: None,
            energy: None,
            enqueued_at: Duration::ZERO,
            unix_secs: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_strike(mut self, distance_km: u8, energy: u32) -> Self {
        self.distance_km = Some(distance_km);
        self.energy = Some(energy);
        self
    }

    /// Wire form handed to the transport.
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            text: self.text.clone(),
            context: self.context.clone(),
            severity: self.severity,
            distance_km: self.distance_km,
            energy: self.energy,
            timestamp: self.unix_secs,
            uptime_ms: self.enqueued_at.as_millis() as u64,
        }
    }
}

/// JSON body delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<u32>,
    /// Unix seconds; `None` before the clock is synced.
    pub timestamp: Option<u64>,
    pub uptime_ms: u64,
}

/// Cheap clonable front end: stamps and enqueues messages, owns the worker.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: Arc<NotificationQueue>,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(clock: Arc<dyn Clock>, enabled: bool) -> Self {
        Self {
            queue: Arc::new(NotificationQueue::new()),
            clock,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn queue(&self) -> &Arc<NotificationQueue> {
        &self.queue
    }

    /// Stamp and enqueue.  Never blocks.
    pub fn send(&self, mut msg: NotificationMessage) -> Admission {
        if !self.enabled {
            debug!("notify: disabled, skipping '{}'", msg.text);
            return Admission::Disabled;
        }
        msg.enqueued_at = self.clock.uptime();
        msg.unix_secs = self.clock.unix_secs();
        self.queue.try_push(msg)
    }

    /// Start the single consuming worker.
    pub fn start_worker<N>(&self, sink: N, policy: DeliveryPolicy) -> Result<JoinHandle<WorkerStats>>
    where
        N: NotificationSink + 'static,
    {
        let queue = Arc::clone(&self.queue);
        spawn_on_core(Core::Pro, 5, 8, "notify\0", move || {
            worker::run(&queue, sink, policy)
        })
    }

    /// Post the shutdown sentinel; the worker drains then exits.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
