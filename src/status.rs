//! Shared monitoring status record.
//!
//! Guarded by the status lock (`SharedStatus`).  Lock order: the sensor
//! lock and the alert lock are always taken *before* this one, never after.
//!
//! The record is what the external status/health collaborator sees via
//! [`MonitoringStatus::snapshot`].

use std::sync::Arc;
use std::time::Duration;

use heapless::Deque;
use parking_lot::Mutex;
use serde::Serialize;

use crate::alerts::AlertSnapshot;
use crate::error::Error;
use crate::events::{LightningEvent, NoiseMode};

/// Lightning events kept for the status view.
pub const EVENT_HISTORY: usize = 100;
/// Hard cap on remembered disturber timestamps.
pub const DISTURBER_CAP: usize = 50;

pub type SharedStatus = Arc<Mutex<MonitoringStatus>>;

/// Coarse health summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Stopped,
    Starting,
    Monitoring,
    /// Running, but the sensor failed a check or a read.
    Degraded,
    /// All bounded recovery exhausted; needs an operator.
    Fatal,
}

// ── Disturber window ──────────────────────────────────────────

/// Time-ordered disturber timestamps, bounded by age and by count.
#[derive(Debug, Clone)]
pub struct DisturberWindow {
    stamps: Deque<Duration, DISTURBER_CAP>,
    window: Duration,
}

impl DisturberWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            stamps: Deque::new(),
            window,
        }
    }

    /// Record a disturber at `now` and return the count inside the window.
    pub fn record(&mut self, now: Duration) -> usize {
        self.evict(now);
        if self.stamps.is_full() {
            self.stamps.pop_front();
        }
        let _ = self.stamps.push_back(now);
        self.stamps.len()
    }

    /// Drop entries older than the window.
    pub fn evict(&mut self, now: Duration) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_sub(oldest) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}

// ── Counters ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterruptCounters {
    pub handled: u32,
    pub lightning: u32,
    pub disturbers: u32,
    pub noise_high: u32,
    pub unknown: u32,
    /// Lightning reported with the out-of-range distance sentinel.
    pub out_of_range: u32,
    pub storm_trips: u32,
    pub lock_timeouts: u32,
    pub read_failures: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryCounters {
    pub init_attempts: u32,
    pub reinitializations: u32,
    pub watchdog_restarts: u32,
    pub consecutive_restart_failures: u32,
}

// ── Status record ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonitoringStatus {
    pub state: MonitorState,
    pub sensor_active: bool,
    pub healthy: bool,
    pub status_message: String,
    pub last_reading: Option<Duration>,
    pub last_error: Option<Error>,
    pub indoor_mode: bool,
    pub noise_mode: NoiseMode,
    pub disturbers: DisturberWindow,
    events: Deque<LightningEvent, EVENT_HISTORY>,
    pub interrupts: InterruptCounters,
    pub recovery: RecoveryCounters,
}

impl MonitoringStatus {
    pub fn new(indoor_mode: bool, disturber_window: Duration) -> Self {
        Self {
            state: MonitorState::Stopped,
            sensor_active: false,
            healthy: false,
            status_message: String::from("Monitoring stopped"),
            last_reading: None,
            last_error: None,
            indoor_mode,
            noise_mode: NoiseMode::Normal,
            disturbers: DisturberWindow::new(disturber_window),
            events: Deque::new(),
            interrupts: InterruptCounters::default(),
            recovery: RecoveryCounters::default(),
        }
    }

    pub fn shared(self) -> SharedStatus {
        Arc::new(Mutex::new(self))
    }

    /// Append to the ring buffer, evicting the oldest event when full.
    pub fn record_event(&mut self, event: LightningEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &LightningEvent> {
        self.events.iter()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn last_event(&self) -> Option<&LightningEvent> {
        self.events.back()
    }

    pub fn set_state(&mut self, state: MonitorState, message: impl Into<String>) {
        self.state = state;
        self.status_message = message.into();
        match state {
            MonitorState::Monitoring => {
                self.sensor_active = true;
                self.healthy = true;
            }
            MonitorState::Degraded => {
                self.healthy = false;
            }
            MonitorState::Stopped | MonitorState::Fatal | MonitorState::Starting => {
                self.sensor_active = false;
                self.healthy = false;
            }
        }
    }

    /// Sensor trouble that recovery is still handling.
    pub fn mark_degraded(&mut self, err: Error) {
        self.last_error = Some(err);
        self.healthy = false;
        if self.state == MonitorState::Monitoring {
            self.state = MonitorState::Degraded;
            self.status_message = format!("Sensor degraded: {err}");
        }
    }

    pub fn mark_healthy(&mut self) {
        self.healthy = true;
        if self.state == MonitorState::Degraded {
            self.state = MonitorState::Monitoring;
            self.status_message = String::from("Monitoring active");
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.state == MonitorState::Fatal
    }

    pub fn snapshot(&self, alerts: AlertSnapshot, monitor_thread_alive: bool) -> StatusSnapshot {
        StatusSnapshot {
            version: env!("CARGO_PKG_VERSION"),
            state: self.state,
            sensor_active: self.sensor_active,
            healthy: self.healthy,
            status_message: self.status_message.clone(),
            last_reading_ms: self.last_reading.map(|d| d.as_millis() as u64),
            last_error: self.last_error.map(|e| e.to_string()),
            indoor_mode: self.indoor_mode,
            noise_mode: self.noise_mode,
            disturbers_in_window: self.disturbers.len(),
            recent_events: self.events.iter().copied().collect(),
            interrupts: self.interrupts,
            recovery: self.recovery,
            alerts,
            monitor_thread_alive,
        }
    }
}

/// Serialisable copy of the status record plus alert state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub version: &'static str,
    pub state: MonitorState,
    pub sensor_active: bool,
    pub healthy: bool,
    pub status_message: String,
    pub last_reading_ms: Option<u64>,
    pub last_error: Option<String>,
    pub indoor_mode: bool,
    pub noise_mode: NoiseMode,
    pub disturbers_in_window: usize,
    pub recent_events: Vec<LightningEvent>,
    pub interrupts: InterruptCounters,
    pub recovery: RecoveryCounters,
    pub alerts: AlertSnapshot,
    pub monitor_thread_alive: bool,
}
