//! Simulated hardware rig for integration tests.
//!
//! Wires a [`Monitor`] to the simulated AS3935, a simulated IRQ line, a
//! manual clock and a sink that records every delivered payload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use strikeguard::adapters::spi_bus::SimBusFactory;
use strikeguard::adapters::time::ManualClock;
use strikeguard::app::ports::NotificationSink;
use strikeguard::drivers::as3935::BusTiming;
use strikeguard::drivers::as3935::sim::SimAs3935;
use strikeguard::drivers::irq::SimIrqLine;
use strikeguard::error::NotifyError;
use strikeguard::interrupt::DispatchTiming;
use strikeguard::noise::RevertTiming;
use strikeguard::notify::{DeliveryPolicy, NotificationPayload};
use strikeguard::status::MonitorState;
use strikeguard::supervisor::SupervisorTiming;
use strikeguard::{Monitor, MonitorConfig, MonitorTiming};

// ── Recording sink ────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub delivered: Arc<Mutex<Vec<NotificationPayload>>>,
}

impl NotificationSink for RecordingSink {
    fn deliver(&mut self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        self.delivered.lock().push(payload.clone());
        Ok(())
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub monitor: Monitor<SimBusFactory>,
    pub factory: SimBusFactory,
    pub chip: SimAs3935,
    pub line: Arc<SimIrqLine>,
    pub clock: Arc<ManualClock>,
    pub sink: RecordingSink,
}

#[allow(dead_code)]
impl Rig {
    /// One falling edge, a second after the previous one.
    pub fn edge(&self) -> bool {
        self.clock.advance(Duration::from_secs(1));
        self.line.fire()
    }

    pub fn state(&self) -> MonitorState {
        self.monitor.status().lock().state
    }

    pub fn wait_for_state(&self, state: MonitorState) -> bool {
        wait_until(Duration::from_secs(5), || self.state() == state)
    }

    pub fn delivered(&self) -> Vec<NotificationPayload> {
        self.sink.delivered.lock().clone()
    }
}

/// Millisecond-scale timings so lifecycle tests finish quickly.
pub fn fast_timing() -> MonitorTiming {
    MonitorTiming {
        supervisor: SupervisorTiming {
            init_attempts: 3,
            init_base_delay: Duration::from_millis(5),
            health_interval: Duration::from_secs(3600),
            health_failure_limit: 3,
            watchdog_interval: Duration::from_secs(3600),
            restart_ceiling: 3,
            bus: BusTiming {
                attempts: 2,
                retry_delay: Duration::from_millis(1),
            },
        },
        dispatch: DispatchTiming {
            settle: Duration::ZERO,
            ..DispatchTiming::default()
        },
        revert: RevertTiming::default(),
        join_timeout: Duration::from_secs(2),
    }
}

pub fn fast_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        backoff: Duration::from_millis(1),
        recv_timeout: Duration::from_millis(10),
        rate_per_sec: 1000,
        burst: 1000,
        rate_wait: Duration::from_millis(1),
        ..DeliveryPolicy::default()
    }
}

pub fn notifying_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.notify.enabled = true;
    config
}

pub fn rig(config: MonitorConfig, timing: MonitorTiming) -> Rig {
    rig_with_policy(config, timing, fast_policy())
}

pub fn rig_with_policy(config: MonitorConfig, timing: MonitorTiming, policy: DeliveryPolicy) -> Rig {
    let chip = SimAs3935::new();
    let factory = SimBusFactory::new(chip.clone());
    let line = Arc::new(SimIrqLine::new(9));
    let clock = Arc::new(ManualClock::new());
    let monitor = Monitor::with_timing(config, factory.clone(), line.clone(), clock.clone(), timing)
        .expect("valid config");
    let sink = RecordingSink::default();
    monitor
        .start_notifications(sink.clone(), policy)
        .expect("worker starts");
    Rig {
        monitor,
        factory,
        chip,
        line,
        clock,
        sink,
    }
}

/// Poll `cond` every 5 ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
