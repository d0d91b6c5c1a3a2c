//! Monitoring lifecycle: initialisation with retry, the health-check
//! loop, and the watchdog that restarts a dead loop.
//!
//! ```text
//!   start ─▶ [monitor thread]  init (≤N tries, exp. backoff) ─▶ arm IRQ
//!                              └─▶ every health period: health check
//!                                  K failures in a row ─▶ disarm, re-init
//!            [watchdog thread] every period: loop alive?  no ─▶ restart
//!                              too many restarts in a row ─▶ FATAL
//! ```
//!
//! Local recovery comes first; the status only goes FATAL once every
//! bounded retry is spent.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::app::ports::{BusFactory, InterruptLine};
use crate::drivers::as3935::{As3935, BusTiming, SensorSettings, SensorSlot};
use crate::drivers::task_pin::{Core, join_within, spawn_on_core};
use crate::error::{Error, InitError, Result, SensorError};
use crate::interrupt::InterruptDispatcher;
use crate::noise::NoiseController;
use crate::signal::StopSignal;
use crate::status::{MonitorState, SharedStatus};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    pub init_attempts: u32,
    /// Wait after the first failed attempt; doubles each time.
    pub init_base_delay: Duration,
    pub health_interval: Duration,
    /// Consecutive failed health checks that trigger a re-init.
    pub health_failure_limit: u32,
    pub watchdog_interval: Duration,
    /// Restarts without the loop surviving a watchdog period.
    pub restart_ceiling: u32,
    pub bus: BusTiming,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            init_attempts: 5,
            init_base_delay: Duration::from_secs(2),
            health_interval: Duration::from_secs(5 * 60),
            health_failure_limit: 3,
            watchdog_interval: Duration::from_secs(60),
            restart_ceiling: 3,
            bus: BusTiming::default(),
        }
    }
}

/// Collaborators shared with the rest of the monitor.
pub struct SupervisorParts<F: BusFactory> {
    pub factory: F,
    pub irq: Arc<dyn InterruptLine>,
    pub settings: SensorSettings,
    pub sensor: SensorSlot<F::Bus>,
    pub status: SharedStatus,
    pub noise: NoiseController<F::Bus>,
    pub dispatcher: InterruptDispatcher<F::Bus>,
    pub stop: StopSignal,
}

struct Inner<F: BusFactory> {
    parts: SupervisorParts<F>,
    timing: SupervisorTiming,
    auto_restart: bool,
    monitor: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

pub struct Supervisor<F: BusFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: BusFactory> Clone for Supervisor<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: BusFactory> Supervisor<F> {
    pub fn new(parts: SupervisorParts<F>, timing: SupervisorTiming, auto_restart: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                parts,
                timing,
                auto_restart,
                monitor: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    // ── Initialisation ────────────────────────────────────────

    /// One attempt: drop any previous driver, open a fresh bus, power up
    /// and probe.  The sensor lock is held throughout.
    fn init_once(&self) -> Result<()> {
        let p = &self.inner.parts;
        let mut slot = p.sensor.lock();
        if let Some(mut old) = slot.take() {
            old.cleanup();
        }
        let bus = p.factory.open()?;
        let mut driver = As3935::with_timing(bus, Arc::clone(&p.irq), p.settings, self.inner.timing.bus);
        driver.power_up()?;
        driver.probe()?;
        *slot = Some(driver);
        Ok(())
    }

    /// Up to `init_attempts` tries with exponential backoff.  Exhaustion
    /// marks the status FATAL.  A stop request aborts with
    /// [`Error::Stopped`].
    pub fn initialize_with_retry(&self) -> Result<()> {
        let p = &self.inner.parts;
        let t = self.inner.timing;
        let mut delay = t.init_base_delay;

        for attempt in 1..=t.init_attempts {
            p.status.lock().recovery.init_attempts += 1;
            match self.init_once() {
                Ok(()) => {
                    info!("supervisor: sensor initialised (attempt {}/{})", attempt, t.init_attempts);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "supervisor: init attempt {}/{} failed: {}",
                        attempt, t.init_attempts, e
                    );
                    p.status.lock().last_error = Some(e);
                }
            }
            if attempt < t.init_attempts {
                if p.stop.wait_timeout(delay) {
                    return Err(Error::Stopped);
                }
                delay = delay.saturating_mul(2);
            }
        }

        error!("supervisor: sensor initialisation failed after {} attempts", t.init_attempts);
        let err = Error::Init(InitError::RetriesExhausted(t.init_attempts));
        let mut st = p.status.lock();
        st.set_state(
            MonitorState::Fatal,
            format!("Sensor initialization failed after {} attempts", t.init_attempts),
        );
        st.last_error = Some(err);
        Err(err)
    }

    fn go_live(&self) -> Result<()> {
        let p = &self.inner.parts;
        p.noise.reset_mode();
        p.dispatcher.arm(Arc::clone(&p.irq))?;
        p.status
            .lock()
            .set_state(MonitorState::Monitoring, "Monitoring active");
        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        let mut slot = self.inner.parts.sensor.lock();
        let driver = slot.as_mut().ok_or(Error::Sensor(SensorError::BusClosed))?;
        driver.health_check()
    }

    fn reinitialize(&self) -> bool {
        let p = &self.inner.parts;
        warn!("supervisor: health checks keep failing, re-initialising sensor");
        p.dispatcher.disarm();
        p.status.lock().recovery.reinitializations += 1;
        match self.initialize_with_retry().and_then(|()| self.go_live()) {
            Ok(()) => true,
            Err(e) => {
                error!("supervisor: re-initialisation failed: {}", e);
                false
            }
        }
    }

    fn teardown(&self) {
        let p = &self.inner.parts;
        p.dispatcher.disarm();
        p.noise.cancel_timer();
        if let Some(mut driver) = p.sensor.lock().take() {
            driver.cleanup();
        }
    }

    // ── Monitoring loop ───────────────────────────────────────

    fn run_monitoring(&self) {
        let p = &self.inner.parts;
        let t = self.inner.timing;
        if p.stop.is_set() {
            return;
        }
        p.status
            .lock()
            .set_state(MonitorState::Starting, "Initializing sensor");

        let live = self.initialize_with_retry().and_then(|()| self.go_live());
        if let Err(e) = live {
            if e != Error::Stopped {
                error!("supervisor: monitoring not started: {}", e);
            }
            self.teardown();
            self.finish();
            return;
        }

        let mut failures = 0u32;
        while !p.stop.wait_timeout(t.health_interval) {
            match self.health_check() {
                Ok(()) => {
                    if failures > 0 {
                        info!("supervisor: sensor healthy again");
                    }
                    failures = 0;
                    p.status.lock().mark_healthy();
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "supervisor: health check failed ({}/{}): {}",
                        failures, t.health_failure_limit, e
                    );
                    p.status.lock().mark_degraded(e);
                    if failures >= t.health_failure_limit {
                        if !self.reinitialize() {
                            self.teardown();
                            self.finish();
                            return;
                        }
                        failures = 0;
                    }
                }
            }
        }

        self.teardown();
        self.finish();
        info!("supervisor: monitoring loop exited");
    }

    /// Leave a FATAL verdict in place; anything else becomes STOPPED.
    fn finish(&self) {
        let mut st = self.inner.parts.status.lock();
        if st.is_fatal() {
            return;
        }
        if self.inner.parts.stop.is_set() {
            st.set_state(MonitorState::Stopped, "Monitoring stopped");
        } else {
            st.set_state(MonitorState::Stopped, "Monitoring loop exited unexpectedly");
        }
    }

    fn spawn_monitor(&self) -> Result<()> {
        let this = self.clone();
        let handle = spawn_on_core(Core::App, 8, 8, "monitor\0", move || this.run_monitoring())?;
        *self.inner.monitor.lock() = Some(handle);
        Ok(())
    }

    // ── Watchdog ──────────────────────────────────────────────

    fn run_watchdog(&self) {
        let p = &self.inner.parts;
        let t = self.inner.timing;

        while !p.stop.wait_timeout(t.watchdog_interval) {
            if self.is_monitor_alive() {
                p.status.lock().recovery.consecutive_restart_failures = 0;
                continue;
            }
            if !self.inner.auto_restart {
                warn!("watchdog: monitoring loop is not running (auto-restart off)");
                continue;
            }

            let restarts = p.status.lock().recovery.consecutive_restart_failures;
            if restarts >= t.restart_ceiling {
                error!("watchdog: monitoring loop died {} times in a row, giving up", restarts);
                p.status.lock().set_state(
                    MonitorState::Fatal,
                    format!("Monitoring loop failed after {restarts} restarts"),
                );
                break;
            }

            warn!("watchdog: monitoring loop is dead, restarting");
            {
                let mut st = p.status.lock();
                st.recovery.consecutive_restart_failures += 1;
                st.recovery.watchdog_restarts += 1;
            }
            if let Err(e) = self.spawn_monitor() {
                error!("watchdog: restart failed: {}", e);
            }
        }
        debug!("watchdog: exited");
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start the monitoring loop and the watchdog.  A no-op if the loop is
    /// already running; refused with [`Error::Busy`] while a stopped loop
    /// is still winding down.
    pub fn start(&self) -> Result<()> {
        let p = &self.inner.parts;
        if self.is_monitor_alive() {
            if p.stop.is_set() {
                warn!("supervisor: previous monitoring loop has not exited yet");
                return Err(Error::Busy("previous monitoring loop is still exiting"));
            }
            info!("supervisor: monitoring already running");
            return Ok(());
        }
        p.stop.clear();
        p.status.lock().recovery.consecutive_restart_failures = 0;
        self.spawn_monitor()?;

        let watchdog_alive = self
            .inner
            .watchdog
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        if !watchdog_alive {
            let this = self.clone();
            let handle = spawn_on_core(Core::App, 3, 4, "watchdog\0", move || this.run_watchdog())?;
            *self.inner.watchdog.lock() = Some(handle);
        }
        Ok(())
    }

    /// Signal stop and wait up to `join_timeout` for each thread.
    /// Returns `false` if the monitoring loop had to be left behind; its
    /// handle is kept so a later `start` cannot run a second loop.
    pub fn stop(&self, join_timeout: Duration) -> bool {
        self.inner.parts.stop.set();
        let joined = self.join_slot(&self.inner.monitor, join_timeout, "monitor");
        self.join_slot(&self.inner.watchdog, join_timeout, "watchdog");
        if !joined {
            // The loop still owns the sensor; the status says so.
            self.inner
                .parts
                .status
                .lock()
                .set_state(MonitorState::Stopped, "Monitoring stopped (loop did not exit)");
        }
        joined
    }

    fn join_slot(&self, slot: &Mutex<Option<JoinHandle<()>>>, timeout: Duration, what: &str) -> bool {
        let Some(handle) = slot.lock().take() else {
            return true;
        };
        match join_within(handle, timeout) {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                error!("supervisor: {} thread panicked", what);
                true
            }
            Err(handle) => {
                warn!("supervisor: {} thread did not exit within {:?}", what, timeout);
                *slot.lock() = Some(handle);
                false
            }
        }
    }

    pub fn is_monitor_alive(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn is_watchdog_alive(&self) -> bool {
        self.inner
            .watchdog
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
