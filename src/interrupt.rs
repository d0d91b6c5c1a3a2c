//! IRQ edge dispatcher.
//!
//! Runs once per falling edge, in the IRQ handler task (never in ISR
//! context).  Fixed order per edge:
//!
//! ```text
//!   stop? ─▶ debounce ─▶ storm guard ─▶ settle ─▶ sensor lock (bounded)
//!         ─▶ read INT ─▶ lightning / disturber / noise-high / unknown
//!         ─▶ last-reading timestamp
//! ```
//!
//! The storm guard watches every raw edge, debounced ones included.  Too
//! many edges inside one sliding window detach the line; a timer
//! re-attaches it after a cooldown if monitoring is still armed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use embedded_hal::spi::SpiDevice;
use heapless::Deque;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::alerts::AlertStateMachine;
use crate::app::ports::{Clock, EdgeHandler, InterruptLine};
use crate::drivers::as3935::{As3935, SensorSlot};
use crate::error::Result;
use crate::events::{InterruptReason, LightningEvent};
use crate::noise::NoiseController;
use crate::notify::{NotificationDispatcher, format};
use crate::pins::{IRQ_DEBOUNCE_MS, IRQ_SETTLE_MS};
use crate::signal::StopSignal;
use crate::status::SharedStatus;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy)]
pub struct DispatchTiming {
    /// Edges closer than this to the last accepted edge are dropped.
    pub debounce: Duration,
    /// Sliding window the storm guard counts raw edges over.
    pub storm_window: Duration,
    /// Raw edges tolerated per window; one more detaches the line.
    /// Capped at `STORM_EDGE_CAP - 1`.
    pub storm_limit: usize,
    pub storm_cooldown: Duration,
    /// Wait after the edge before reading INT.
    pub settle: Duration,
    pub lock_timeout: Duration,
}

impl Default for DispatchTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(IRQ_DEBOUNCE_MS),
            storm_window: Duration::from_secs(1),
            storm_limit: 100,
            storm_cooldown: Duration::from_secs(5),
            settle: Duration::from_millis(IRQ_SETTLE_MS),
            lock_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Debounced,
    Storm,
    /// Guard already tripped; edge arrived before the detach took hold.
    Suppressed,
}

/// Raw edge timestamps kept for the storm window.
pub const STORM_EDGE_CAP: usize = 128;

#[derive(Debug, Default)]
struct EdgeGuard {
    recent: Deque<Duration, STORM_EDGE_CAP>,
    last_accepted: Option<Duration>,
    tripped: bool,
}

impl EdgeGuard {
    fn admit(&mut self, now: Duration, t: &DispatchTiming) -> Verdict {
        if self.tripped {
            return Verdict::Suppressed;
        }
        while self
            .recent
            .front()
            .is_some_and(|&first| now.saturating_sub(first) >= t.storm_window)
        {
            self.recent.pop_front();
        }
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        // Cannot fail: a slot was freed above if the deque was full.
        let _ = self.recent.push_back(now);
        if self.recent.len() > t.storm_limit.min(STORM_EDGE_CAP - 1) {
            self.tripped = true;
            return Verdict::Storm;
        }

        if self
            .last_accepted
            .is_some_and(|prev| now.saturating_sub(prev) < t.debounce)
        {
            return Verdict::Debounced;
        }
        self.last_accepted = Some(now);
        Verdict::Accept
    }
}

/// Everything the dispatcher talks to.
pub struct DispatchContext<S> {
    pub sensor: SensorSlot<S>,
    pub status: SharedStatus,
    pub alerts: AlertStateMachine,
    pub noise: NoiseController<S>,
    pub notifier: NotificationDispatcher,
    pub clock: Arc<dyn Clock>,
    pub stop: StopSignal,
}

struct Inner<S> {
    ctx: DispatchContext<S>,
    timing: DispatchTiming,
    guard: Mutex<EdgeGuard>,
    armed: AtomicBool,
    line: Mutex<Option<Arc<dyn InterruptLine>>>,
    reenable: Mutex<Option<Timer>>,
}

pub struct InterruptDispatcher<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for InterruptDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SpiDevice + Send + 'static> InterruptDispatcher<S> {
    pub fn new(ctx: DispatchContext<S>, timing: DispatchTiming) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                timing,
                guard: Mutex::new(EdgeGuard::default()),
                armed: AtomicBool::new(false),
                line: Mutex::new(None),
                reenable: Mutex::new(None),
            }),
        }
    }

    /// Handler suitable for [`InterruptLine::attach`].  Holds only a weak
    /// reference, so a dropped dispatcher turns edges into no-ops.
    pub fn edge_handler(&self) -> EdgeHandler {
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                InterruptDispatcher { inner }.on_edge();
            }
        })
    }

    pub fn arm(&self, line: Arc<dyn InterruptLine>) -> Result<()> {
        *self.inner.guard.lock() = EdgeGuard::default();
        self.inner.armed.store(true, Ordering::Release);
        line.attach(self.edge_handler())?;
        info!("irq: armed on GPIO {}", line.pin());
        *self.inner.line.lock() = Some(line);
        Ok(())
    }

    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::Release);
        if let Some(t) = self.inner.reenable.lock().take() {
            t.cancel();
        }
        if let Some(line) = self.inner.line.lock().take() {
            line.detach();
            debug!("irq: disarmed GPIO {}", line.pin());
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    // ── Per-edge path ─────────────────────────────────────────

    pub fn on_edge(&self) {
        let ctx = &self.inner.ctx;
        let t = self.inner.timing;
        if ctx.stop.is_set() {
            return;
        }

        let now = ctx.clock.uptime();
        match self.inner.guard.lock().admit(now, &t) {
            Verdict::Accept => {}
            Verdict::Debounced | Verdict::Suppressed => return,
            Verdict::Storm => {
                self.trip();
                return;
            }
        }

        if !t.settle.is_zero() {
            std::thread::sleep(t.settle);
        }

        let Some(mut slot) = ctx.sensor.try_lock_for(t.lock_timeout) else {
            warn!("irq: sensor lock busy, edge dropped");
            ctx.status.lock().interrupts.lock_timeouts += 1;
            return;
        };
        let Some(driver) = slot.as_mut().filter(|d| d.is_open()) else {
            debug!("irq: edge with no live sensor");
            return;
        };

        if let Err(e) = self.dispatch(driver) {
            error!("irq: sensor read failed: {}", e);
            driver.mark_degraded(e);
            let mut st = ctx.status.lock();
            st.interrupts.read_failures += 1;
            st.mark_degraded(e);
            return;
        }
        ctx.status.lock().last_reading = Some(now);
    }

    fn dispatch(&self, driver: &mut As3935<S>) -> Result<()> {
        let ctx = &self.inner.ctx;
        let reason = driver.interrupt_reason()?;
        ctx.status.lock().interrupts.handled += 1;

        match reason {
            InterruptReason::Lightning => self.on_lightning(driver)?,
            InterruptReason::Disturber => {
                ctx.status.lock().interrupts.disturbers += 1;
                ctx.noise.on_disturber(driver);
            }
            InterruptReason::NoiseHigh => {
                ctx.status.lock().interrupts.noise_high += 1;
                ctx.noise.on_noise_high(driver);
            }
            InterruptReason::Unknown(raw) => {
                warn!("irq: unknown interrupt reason {:#04x}", raw);
                ctx.status.lock().interrupts.unknown += 1;
            }
        }
        Ok(())
    }

    fn on_lightning(&self, driver: &mut As3935<S>) -> Result<()> {
        let ctx = &self.inner.ctx;
        let distance = driver.lightning_distance()?;
        let energy = driver.lightning_energy()?;

        let alert_level = match distance.km() {
            Some(km) => {
                let level = ctx.alerts.evaluate(km, energy);
                if let Some(level) = level {
                    ctx.notifier.send(format::lightning_alert(level, km, energy, false));
                }
                level
            }
            None => {
                warn!("irq: lightning reported out of range (energy {})", energy);
                None
            }
        };

        let event = LightningEvent {
            uptime_ms: ctx.clock.uptime().as_millis() as u64,
            unix_secs: ctx.clock.unix_secs(),
            distance,
            energy,
            alert_sent: alert_level.is_some(),
            alert_level,
        };
        info!(
            "irq: lightning at {} (energy {}, alert {:?})",
            distance, energy, alert_level
        );

        let mut st = ctx.status.lock();
        st.interrupts.lightning += 1;
        if distance.km().is_none() {
            st.interrupts.out_of_range += 1;
        }
        st.record_event(event);
        Ok(())
    }

    // ── Storm guard ───────────────────────────────────────────

    fn trip(&self) {
        let t = self.inner.timing;
        warn!(
            "irq: more than {} edges within {:?}, detaching for {:?}",
            t.storm_limit, t.storm_window, t.storm_cooldown
        );
        if let Some(line) = self.inner.line.lock().clone() {
            line.detach();
        }
        self.inner.ctx.status.lock().interrupts.storm_trips += 1;

        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let mut slot = self.inner.reenable.lock();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        match Timer::schedule("irq-reenable\0", t.storm_cooldown, move || {
            if let Some(inner) = weak.upgrade() {
                InterruptDispatcher { inner }.reenable();
            }
        }) {
            Ok(timer) => *slot = Some(timer),
            Err(e) => error!("irq: could not arm re-enable timer: {}", e),
        }
    }

    fn reenable(&self) {
        if !self.is_armed() || self.inner.ctx.stop.is_set() {
            debug!("irq: storm cooldown over, monitoring no longer armed");
            return;
        }
        *self.inner.guard.lock() = EdgeGuard::default();
        let Some(line) = self.inner.line.lock().clone() else {
            return;
        };
        match line.attach(self.edge_handler()) {
            Ok(()) => info!("irq: storm cooldown over, GPIO {} re-armed", line.pin()),
            Err(e) => error!("irq: re-arm after storm failed: {}", e),
        }
    }
}
