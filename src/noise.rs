//! Adaptive noise-floor controller.
//!
//! ```text
//!             N disturbers in window              NOISE_HIGH interrupt
//!   NORMAL ─────────────────────────▶ HIGH ───────────────────────────▶ CRITICAL
//!     ▲          NF_LEV = raised         │          NF_LEV = 7              │
//!     └──────── revert timer ────────────┴──────── revert timer ────────────┘
//!               (NF_LEV = baseline, window cleared)
//! ```
//!
//! Escalation runs inside the interrupt path with the sensor lock already
//! held; the revert timer takes the sensor lock itself (bounded wait) and
//! then the status lock.  A revert is only honoured if the mode still
//! equals the mode it was armed for.

use std::sync::{Arc, Weak};
use std::time::Duration;

use embedded_hal::spi::SpiDevice;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::app::ports::Clock;
use crate::config::NoiseConfig;
use crate::drivers::as3935::registers::NOISE_FLOOR_MAX;
use crate::drivers::as3935::{As3935, SensorSlot};
use crate::events::NoiseMode;
use crate::status::SharedStatus;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseSettings {
    pub enabled: bool,
    pub event_threshold: usize,
    pub revert_delay: Duration,
    pub raised_level: u8,
}

impl From<&NoiseConfig> for NoiseSettings {
    fn from(c: &NoiseConfig) -> Self {
        Self {
            enabled: c.enabled,
            event_threshold: usize::from(c.event_threshold),
            revert_delay: Duration::from_secs(u64::from(c.revert_delay_minutes) * 60),
            raised_level: c.raised_noise_floor_level,
        }
    }
}

/// Bounds for the revert timer's sensor-lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct RevertTiming {
    pub lock_timeout: Duration,
    /// Delay before trying again when the lock was busy.
    pub retry_delay: Duration,
}

impl Default for RevertTiming {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(5),
        }
    }
}

struct Inner<S> {
    settings: NoiseSettings,
    timing: RevertTiming,
    sensor: SensorSlot<S>,
    status: SharedStatus,
    clock: Arc<dyn Clock>,
    /// Leaf lock.
    revert_timer: Mutex<Option<Timer>>,
}

pub struct NoiseController<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for NoiseController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SpiDevice + Send + 'static> NoiseController<S> {
    pub fn new(
        settings: NoiseSettings,
        timing: RevertTiming,
        sensor: SensorSlot<S>,
        status: SharedStatus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                timing,
                sensor,
                status,
                clock,
                revert_timer: Mutex::new(None),
            }),
        }
    }

    pub fn mode(&self) -> NoiseMode {
        self.inner.status.lock().noise_mode
    }

    // ── Escalation (sensor lock held by caller) ───────────────

    /// Disturber path: count, and escalate to HIGH at the threshold.
    pub fn on_disturber(&self, driver: &mut As3935<S>) {
        let s = self.inner.settings;
        let now = self.inner.clock.uptime();
        let mut st = self.inner.status.lock();
        let count = st.disturbers.record(now);
        debug!("noise: disturber ({} in window)", count);

        if !s.enabled || count < s.event_threshold || st.noise_mode == NoiseMode::Critical {
            return;
        }
        if st.noise_mode == NoiseMode::Normal {
            if let Err(e) = driver.set_noise_floor(s.raised_level) {
                error!("noise: could not raise noise floor: {}", e);
                driver.mark_degraded(e);
                st.mark_degraded(e);
                return;
            }
            st.noise_mode = NoiseMode::High;
            warn!(
                "noise: {} disturbers within window, noise floor raised to {}",
                count, s.raised_level
            );
        }
        drop(st);
        self.schedule_revert(NoiseMode::High, s.revert_delay);
    }

    /// Noise-high path: go straight to CRITICAL with the maximum floor.
    pub fn on_noise_high(&self, driver: &mut As3935<S>) {
        let s = self.inner.settings;
        if !s.enabled {
            return;
        }
        let mut st = self.inner.status.lock();
        if st.noise_mode == NoiseMode::Critical {
            return;
        }
        if let Err(e) = driver.set_noise_floor(NOISE_FLOOR_MAX) {
            error!("noise: could not force maximum noise floor: {}", e);
            driver.mark_degraded(e);
            st.mark_degraded(e);
            return;
        }
        st.noise_mode = NoiseMode::Critical;
        drop(st);
        warn!("noise: noise level too high, noise floor forced to {}", NOISE_FLOOR_MAX);
        self.schedule_revert(NoiseMode::Critical, s.revert_delay);
    }

    // ── Revert ────────────────────────────────────────────────

    fn schedule_revert(&self, expected: NoiseMode, delay: Duration) {
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let mut slot = self.inner.revert_timer.lock();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        match Timer::schedule("noise-revert\0", delay, move || {
            if let Some(inner) = weak.upgrade() {
                NoiseController { inner }.revert(expected);
            }
        }) {
            Ok(timer) => *slot = Some(timer),
            Err(e) => error!("noise: could not arm revert timer: {}", e),
        }
    }

    /// Revert to NORMAL if the mode is still `expected`.  Returns `true`
    /// when the revert happened.
    pub fn revert(&self, expected: NoiseMode) -> bool {
        let Some(mut sensor) = self.inner.sensor.try_lock_for(self.inner.timing.lock_timeout) else {
            warn!("noise: sensor busy, retrying revert later");
            self.schedule_revert(expected, self.inner.timing.retry_delay);
            return false;
        };
        let mut st = self.inner.status.lock();
        if st.noise_mode != expected {
            debug!(
                "noise: stale revert for {:?} ignored (mode is {:?})",
                expected, st.noise_mode
            );
            return false;
        }

        match sensor.as_mut() {
            Some(driver) if driver.is_open() => {
                let baseline = driver.original_noise_floor();
                if let Err(e) = driver.set_noise_floor(baseline) {
                    error!("noise: revert to baseline {} failed: {}", baseline, e);
                    driver.mark_degraded(e);
                    st.mark_degraded(e);
                    drop(st);
                    drop(sensor);
                    self.schedule_revert(expected, self.inner.timing.retry_delay);
                    return false;
                }
            }
            // No live sensor: the next power-up applies the baseline.
            _ => debug!("noise: no live sensor, resetting mode only"),
        }

        st.noise_mode = NoiseMode::Normal;
        st.disturbers.clear();
        info!("noise: reverted from {:?} to NORMAL", expected);
        true
    }

    /// Cancel any pending revert and revert immediately.
    /// Must not be called with the sensor lock held.
    pub fn force_revert(&self) -> bool {
        self.cancel_timer();
        let mode = self.mode();
        if mode == NoiseMode::Normal {
            return false;
        }
        self.revert(mode)
    }

    pub fn cancel_timer(&self) {
        if let Some(t) = self.inner.revert_timer.lock().take() {
            t.cancel();
        }
    }

    /// A freshly powered sensor runs at its baseline floor.
    pub fn reset_mode(&self) {
        self.cancel_timer();
        let mut st = self.inner.status.lock();
        st.noise_mode = NoiseMode::Normal;
        st.disturbers.clear();
    }

    pub fn revert_pending(&self) -> bool {
        self.inner
            .revert_timer
            .lock()
            .as_ref()
            .is_some_and(Timer::is_pending)
    }
}
