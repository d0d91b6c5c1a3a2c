//! Proximity alert state machine.
//!
//! ```text
//!            strike ≤ zone distance             all-clear timer, zone quiet
//!  INACTIVE ──────────────────────────▶ ACTIVE ─────────────────────────────▶ INACTIVE
//!                                        │  ▲
//!                                        └──┘ further strikes re-arm the timer
//! ```
//!
//! CRITICAL dominates: raising it forces WARNING inactive (and cancels the
//! WARNING timer), and warning-range strikes are ignored while CRITICAL
//! is active.  All zone state and both timers sit behind the alert lock.
//! Lock order: sensor → alert → status; the notification queue is a leaf.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Serialize;

use crate::app::ports::Clock;
use crate::config::AlertConfig;
use crate::events::AlertLevel;
use crate::notify::{NotificationDispatcher, format};
use crate::timer::Timer;

/// Thresholds fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertThresholds {
    pub critical_distance_km: u8,
    pub warning_distance_km: u8,
    pub energy_threshold: u32,
    /// Quiet period before a zone clears.
    pub all_clear: Duration,
}

impl From<&AlertConfig> for AlertThresholds {
    fn from(c: &AlertConfig) -> Self {
        Self {
            critical_distance_km: c.critical_distance_km,
            warning_distance_km: c.warning_distance_km,
            energy_threshold: c.energy_threshold,
            all_clear: Duration::from_secs(u64::from(c.all_clear_minutes) * 60),
        }
    }
}

impl AlertThresholds {
    pub fn zone_distance(&self, zone: AlertLevel) -> u8 {
        match zone {
            AlertLevel::Warning => self.warning_distance_km,
            AlertLevel::Critical => self.critical_distance_km,
        }
    }
}

#[derive(Debug, Default)]
struct Zone {
    active: bool,
    last_strike: Option<Duration>,
    timer: Option<Timer>,
}

impl Zone {
    fn cancel_timer(&mut self) {
        if let Some(t) = self.timer.take() {
            t.cancel();
        }
    }
}

#[derive(Debug, Default)]
struct Zones {
    warning: Zone,
    critical: Zone,
}

impl Zones {
    fn get_mut(&mut self, zone: AlertLevel) -> &mut Zone {
        match zone {
            AlertLevel::Warning => &mut self.warning,
            AlertLevel::Critical => &mut self.critical,
        }
    }
}

/// Read-only view for the status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertSnapshot {
    pub warning_active: bool,
    pub critical_active: bool,
    pub warning_last_strike_ms: Option<u64>,
    pub critical_last_strike_ms: Option<u64>,
    pub warning_timer_pending: bool,
    pub critical_timer_pending: bool,
}

struct Inner {
    thresholds: AlertThresholds,
    zones: Mutex<Zones>,
    clock: Arc<dyn Clock>,
    notifier: NotificationDispatcher,
}

/// Clonable handle; clones share one state.
#[derive(Clone)]
pub struct AlertStateMachine {
    inner: Arc<Inner>,
}

impl AlertStateMachine {
    pub fn new(
        thresholds: AlertThresholds,
        clock: Arc<dyn Clock>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                thresholds,
                zones: Mutex::new(Zones::default()),
                clock,
                notifier,
            }),
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.inner.thresholds
    }

    /// Feed one lightning strike.  Returns the level of a *newly raised*
    /// alert; `None` when nothing new should be announced.
    pub fn evaluate(&self, distance_km: u8, energy: u32) -> Option<AlertLevel> {
        let t = self.inner.thresholds;
        if energy < t.energy_threshold {
            debug!("alerts: energy {} below threshold {}", energy, t.energy_threshold);
            return None;
        }

        let now = self.inner.clock.uptime();
        let mut zones = self.inner.zones.lock();

        if distance_km <= t.critical_distance_km {
            let raised = !zones.critical.active;
            zones.critical.last_strike = Some(now);
            if raised {
                zones.critical.active = true;
                zones.warning.active = false;
                zones.warning.cancel_timer();
                info!("alerts: CRITICAL raised ({}km, energy {})", distance_km, energy);
            }
            self.arm_all_clear(&mut zones, AlertLevel::Critical);
            return raised.then_some(AlertLevel::Critical);
        }

        if distance_km <= t.warning_distance_km && !zones.critical.active {
            let raised = !zones.warning.active;
            zones.warning.last_strike = Some(now);
            if raised {
                zones.warning.active = true;
                info!("alerts: WARNING raised ({}km, energy {})", distance_km, energy);
            }
            self.arm_all_clear(&mut zones, AlertLevel::Warning);
            return raised.then_some(AlertLevel::Warning);
        }

        None
    }

    /// (Re)schedule the zone's all-clear timer, cancelling the previous one.
    fn arm_all_clear(&self, zones: &mut Zones, zone: AlertLevel) {
        let slot = zones.get_mut(zone);
        slot.cancel_timer();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let name = match zone {
            AlertLevel::Warning => "all-clear-w\0",
            AlertLevel::Critical => "all-clear-c\0",
        };
        match Timer::schedule(name, self.inner.thresholds.all_clear, move || {
            if let Some(inner) = weak.upgrade() {
                AlertStateMachine { inner }.fire_all_clear(zone);
            }
        }) {
            Ok(timer) => slot.timer = Some(timer),
            Err(e) => error!("alerts: could not arm {} all-clear timer: {}", zone, e),
        }
    }

    /// All-clear timer body.  Re-checks under the lock that the zone is
    /// still active and has been quiet for the full period since its true
    /// last strike.  Returns `true` if the all-clear was sent.
    pub fn fire_all_clear(&self, zone: AlertLevel) -> bool {
        let t = self.inner.thresholds;
        let now = self.inner.clock.uptime();
        let mut zones = self.inner.zones.lock();
        let slot = zones.get_mut(zone);

        if !slot.active {
            return false;
        }
        let quiet = slot
            .last_strike
            .is_none_or(|last| now.saturating_sub(last) >= t.all_clear);
        if !quiet {
            debug!("alerts: stale {} all-clear ignored", zone);
            return false;
        }

        slot.active = false;
        slot.cancel_timer();
        let minutes = (t.all_clear.as_secs() / 60) as u32;
        self.inner
            .notifier
            .send(format::all_clear(zone, t.zone_distance(zone), minutes));
        info!("alerts: {} all clear", zone);
        true
    }

    /// Cancel both timers and deactivate both zones.
    pub fn reset(&self) {
        let zones = &mut *self.inner.zones.lock();
        for zone in [&mut zones.warning, &mut zones.critical] {
            zone.cancel_timer();
            zone.active = false;
        }
        info!("alerts: reset");
    }

    pub fn is_active(&self, zone: AlertLevel) -> bool {
        self.inner.zones.lock().get_mut(zone).active
    }

    pub fn snapshot(&self) -> AlertSnapshot {
        let zones = self.inner.zones.lock();
        let ms = |d: Option<Duration>| d.map(|d| d.as_millis() as u64);
        let pending = |z: &Zone| z.timer.as_ref().is_some_and(Timer::is_pending);
        AlertSnapshot {
            warning_active: zones.warning.active,
            critical_active: zones.critical.active,
            warning_last_strike_ms: ms(zones.warning.last_strike),
            critical_last_strike_ms: ms(zones.critical.last_strike),
            warning_timer_pending: pending(&zones.warning),
            critical_timer_pending: pending(&zones.critical),
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::adapters::time::ManualClock;
    use crate::notify::Severity;

    fn machine(all_clear: Duration) -> (AlertStateMachine, Arc<ManualClock>, NotificationDispatcher) {
        let clock = Arc::new(ManualClock::new());
        let notifier = NotificationDispatcher::new(clock.clone(), true);
        let thresholds = AlertThresholds {
            critical_distance_km: 10,
            warning_distance_km: 30,
            energy_threshold: 100_000,
            all_clear,
        };
        (
            AlertStateMachine::new(thresholds, clock.clone(), notifier.clone()),
            clock,
            notifier,
        )
    }

    const LONG: Duration = Duration::from_secs(15 * 60);

    #[test]
    fn low_energy_never_alarms() {
        let (m, _, _) = machine(LONG);
        assert_eq!(m.evaluate(5, 99_999), None);
        assert_eq!(m.snapshot(), AlertSnapshot::default());
    }

    #[test]
    fn critical_supersedes_warning() {
        let (m, _, _) = machine(LONG);
        assert_eq!(m.evaluate(25, 150_000), Some(AlertLevel::Warning));
        assert!(m.is_active(AlertLevel::Warning));

        assert_eq!(m.evaluate(8, 250_000), Some(AlertLevel::Critical));
        let s = m.snapshot();
        assert!(s.critical_active && !s.warning_active);
        assert!(!s.warning_timer_pending, "warning timer cancelled");

        assert_eq!(m.evaluate(25, 150_000), None);
        assert!(!m.is_active(AlertLevel::Warning));
        m.reset();
    }

    #[test]
    fn repeated_strikes_in_zone_do_not_realert() {
        let (m, _, _) = machine(LONG);
        assert_eq!(m.evaluate(20, 200_000), Some(AlertLevel::Warning));
        assert_eq!(m.evaluate(22, 200_000), None);
        assert_eq!(m.evaluate(40, 200_000), None, "beyond both zones");
        m.reset();
    }

    #[test]
    fn stale_all_clear_is_ignored() {
        let (m, clock, notifier) = machine(LONG);
        m.evaluate(8, 250_000);
        clock.advance(Duration::from_secs(10 * 60));
        m.evaluate(9, 250_000);
        clock.advance(Duration::from_secs(6 * 60));
        assert!(!m.fire_all_clear(AlertLevel::Critical), "only 6 min since last strike");
        assert!(m.is_active(AlertLevel::Critical));

        clock.advance(Duration::from_secs(9 * 60));
        assert!(m.fire_all_clear(AlertLevel::Critical));
        assert!(!m.is_active(AlertLevel::Critical));
        assert_eq!(notifier.queue().severities(), vec![Severity::AllClear]);
        m.reset();
    }

    #[test]
    fn all_clear_is_idempotent() {
        let (m, clock, notifier) = machine(LONG);
        m.evaluate(20, 250_000);
        clock.advance(LONG);
        assert!(m.fire_all_clear(AlertLevel::Warning));
        assert!(!m.fire_all_clear(AlertLevel::Warning));
        assert_eq!(notifier.queue().len(), 1);
    }

    #[test]
    fn timer_fires_all_clear() {
        let clock = Arc::new(crate::adapters::time::SystemClock::new());
        let notifier = NotificationDispatcher::new(clock.clone(), true);
        let m = AlertStateMachine::new(
            AlertThresholds {
                critical_distance_km: 10,
                warning_distance_km: 30,
                energy_threshold: 1,
                all_clear: Duration::from_millis(30),
            },
            clock,
            notifier.clone(),
        );
        m.evaluate(15, 10);
        std::thread::sleep(Duration::from_millis(300));
        assert!(!m.is_active(AlertLevel::Warning));
        assert_eq!(notifier.queue().severities(), vec![Severity::AllClear]);
    }

    #[test]
    fn reset_cancels_timers() {
        let (m, _, _) = machine(LONG);
        m.evaluate(8, 250_000);
        assert!(m.snapshot().critical_timer_pending);
        m.reset();
        let s = m.snapshot();
        assert!(!s.critical_active && !s.critical_timer_pending);
    }
}
