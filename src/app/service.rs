//! Monitor service — the hexagonal core.
//!
//! [`Monitor`] wires the supervisor, IRQ dispatcher, alert machine,
//! noise controller and notification pipeline around one shared status
//! record.  All I/O flows through the port traits, so the whole service
//! runs on the host against the simulated sensor.
//!
//! ```text
//!  BusFactory ──▶ ┌─────────────────────────────┐ ──▶ NotificationSink
//!                 │           Monitor            │
//! InterruptLine ─▶│ Supervisor · IRQ · Alerts ·  │ ──▶ StatusSnapshot
//!                 │ Noise · Notifications        │
//!                 └─────────────────────────────┘
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::alerts::AlertStateMachine;
use crate::config::MonitorConfig;
use crate::drivers::as3935::SensorSlot;
use crate::drivers::task_pin::join_within;
use crate::error::{Error, Result};
use crate::events::{AlertLevel, Distance, LightningEvent};
use crate::interrupt::{DispatchContext, DispatchTiming, InterruptDispatcher};
use crate::noise::{NoiseController, RevertTiming};
use crate::notify::{Admission, DeliveryPolicy, NotificationDispatcher, WorkerStats, format};
use crate::signal::StopSignal;
use crate::status::{MonitoringStatus, SharedStatus, StatusSnapshot};
use crate::supervisor::{Supervisor, SupervisorParts, SupervisorTiming};

use super::commands::MonitorCommand;
use super::ports::{BusFactory, Clock, InterruptLine, NotificationSink};

/// Every tunable delay in one place; the defaults are the field values.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    pub supervisor: SupervisorTiming,
    pub dispatch: DispatchTiming,
    pub revert: RevertTiming,
    /// Bound on waiting for the monitoring loop to exit.
    pub join_timeout: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            supervisor: SupervisorTiming::default(),
            dispatch: DispatchTiming::default(),
            revert: RevertTiming::default(),
            join_timeout: Duration::from_secs(5),
        }
    }
}

const TEST_WARNING: (u8, u32) = (25, 150_000);
const TEST_CRITICAL: (u8, u32) = (8, 250_000);

// ───────────────────────────────────────────────────────────────
// Monitor
// ───────────────────────────────────────────────────────────────

pub struct Monitor<F: BusFactory> {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    sensor: SensorSlot<F::Bus>,
    alerts: AlertStateMachine,
    noise: NoiseController<F::Bus>,
    notifier: NotificationDispatcher,
    supervisor: Supervisor<F>,
    join_timeout: Duration,
    worker: Mutex<Option<JoinHandle<WorkerStats>>>,
}

impl<F: BusFactory> Monitor<F> {
    /// Validate `config` and wire everything.  Nothing runs until
    /// [`start`](Self::start) or [`auto_start`](Self::auto_start).
    pub fn new(
        config: MonitorConfig,
        factory: F,
        irq: Arc<dyn InterruptLine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::with_timing(config, factory, irq, clock, MonitorTiming::default())
    }

    pub fn with_timing(
        config: MonitorConfig,
        factory: F,
        irq: Arc<dyn InterruptLine>,
        clock: Arc<dyn Clock>,
        timing: MonitorTiming,
    ) -> Result<Self> {
        config.validate()?;

        let window = Duration::from_secs(u64::from(config.noise.time_window_secs));
        let status = MonitoringStatus::new(config.sensor.indoor, window).shared();
        let sensor: SensorSlot<F::Bus> = Arc::new(Mutex::new(None));
        let notifier = NotificationDispatcher::new(Arc::clone(&clock), config.notify.enabled);
        let alerts = AlertStateMachine::new((&config.alerts).into(), Arc::clone(&clock), notifier.clone());
        let noise = NoiseController::new(
            (&config.noise).into(),
            timing.revert,
            Arc::clone(&sensor),
            Arc::clone(&status),
            Arc::clone(&clock),
        );
        let stop = StopSignal::new();
        let dispatcher = InterruptDispatcher::new(
            DispatchContext {
                sensor: Arc::clone(&sensor),
                status: Arc::clone(&status),
                alerts: alerts.clone(),
                noise: noise.clone(),
                notifier: notifier.clone(),
                clock: Arc::clone(&clock),
                stop: stop.clone(),
            },
            timing.dispatch,
        );
        let supervisor = Supervisor::new(
            SupervisorParts {
                factory,
                irq,
                settings: (&config.sensor).into(),
                sensor: Arc::clone(&sensor),
                status: Arc::clone(&status),
                noise: noise.clone(),
                dispatcher,
                stop,
            },
            timing.supervisor,
            config.system.auto_restart,
        );

        info!(
            "monitor: {} mode, {:?} sensitivity, warning ≤{}km, critical ≤{}km",
            if config.sensor.indoor { "indoor" } else { "outdoor" },
            config.sensor.sensitivity,
            config.alerts.warning_distance_km,
            config.alerts.critical_distance_km
        );

        Ok(Self {
            config,
            clock,
            status,
            sensor,
            alerts,
            noise,
            notifier,
            supervisor,
            join_timeout: timing.join_timeout,
            worker: Mutex::new(None),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start the notification worker on `sink`.  A no-op when
    /// notifications are disabled or the worker already runs.
    pub fn start_notifications<N>(&self, sink: N, policy: DeliveryPolicy) -> Result<()>
    where
        N: NotificationSink + 'static,
    {
        if !self.notifier.is_enabled() {
            info!("monitor: notifications disabled");
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        *worker = Some(self.notifier.start_worker(sink, policy)?);
        Ok(())
    }

    /// Start monitoring if the sensor config asks for it.
    pub fn auto_start(&self) -> Result<()> {
        if self.config.sensor.auto_start {
            info!("monitor: auto-starting");
            self.start()
        } else {
            info!("monitor: auto-start disabled");
            Ok(())
        }
    }

    pub fn start(&self) -> Result<()> {
        self.supervisor.start()
    }

    /// Stop monitoring, drop both alert zones and the revert timer.
    /// Returns `false` if the loop did not exit within the join bound.
    pub fn stop(&self) -> bool {
        let joined = self.supervisor.stop(self.join_timeout);
        self.alerts.reset();
        self.noise.cancel_timer();
        info!("monitor: stopped");
        joined
    }

    /// Stop everything and let the worker drain the queue.  The worker is
    /// given `join_timeout` to finish; `None` if it did not (or panicked).
    pub fn shutdown(&self) -> Option<WorkerStats> {
        info!("monitor: shutting down");
        self.stop();
        self.notifier.shutdown();
        let handle = self.worker.lock().take()?;
        match join_within(handle, self.join_timeout) {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(_)) => {
                error!("monitor: notification worker panicked");
                None
            }
            Err(_) => {
                warn!(
                    "monitor: notification worker still draining after {:?}, detaching",
                    self.join_timeout
                );
                None
            }
        }
    }

    // ── Operator actions ──────────────────────────────────────

    /// Clear both zones and force the noise floor back to its baseline.
    pub fn reset_alerts(&self) {
        self.alerts.reset();
        self.noise.force_revert();
        info!("monitor: alerts and noise mode reset");
    }

    /// Record a simulated strike and send a TEST-prefixed alert.  Only
    /// allowed when the system config enables debug mode.
    pub fn inject_test_alert(&self, level: AlertLevel) -> Result<LightningEvent> {
        if !self.config.system.debug {
            warn!("monitor: test alert refused outside debug mode");
            return Err(Error::Config("test alerts are only available in debug mode"));
        }
        let (km, energy) = match level {
            AlertLevel::Warning => TEST_WARNING,
            AlertLevel::Critical => TEST_CRITICAL,
        };
        let event = LightningEvent {
            uptime_ms: self.clock.uptime().as_millis() as u64,
            unix_secs: self.clock.unix_secs(),
            distance: Distance::Km(km),
            energy,
            alert_sent: true,
            alert_level: Some(level),
        };
        self.status.lock().record_event(event);
        self.notifier.send(format::lightning_alert(level, km, energy, true));
        info!("monitor: test {} alert injected", level);
        Ok(event)
    }

    pub fn send_test_notification(&self) -> Admission {
        self.notifier
            .send(format::info("Test message from the strikeguard lightning monitor"))
    }

    pub fn handle_command(&self, cmd: MonitorCommand) -> Result<()> {
        match cmd {
            MonitorCommand::Start => self.start(),
            MonitorCommand::Stop => {
                self.stop();
                Ok(())
            }
            MonitorCommand::ResetAlerts => {
                self.reset_alerts();
                Ok(())
            }
            MonitorCommand::TestAlert { level } => self.inject_test_alert(level).map(|_| ()),
            MonitorCommand::TestNotification => match self.send_test_notification() {
                Admission::Closed => Err(Error::Stopped),
                Admission::Disabled => Err(Error::Config("notifications are disabled")),
                _ => Ok(()),
            },
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let alerts = self.alerts.snapshot();
        let alive = self.supervisor.is_monitor_alive();
        self.status.lock().snapshot(alerts, alive)
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    /// The live driver slot; taking this lock excludes the supervisor
    /// and the IRQ path.
    pub fn sensor(&self) -> &SensorSlot<F::Bus> {
        &self.sensor
    }

    pub fn alerts(&self) -> &AlertStateMachine {
        &self.alerts
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub fn supervisor(&self) -> &Supervisor<F> {
        &self.supervisor
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}
