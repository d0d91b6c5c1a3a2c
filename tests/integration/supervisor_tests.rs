//! Supervisor lifecycle: init retry, health-driven re-init, watchdog.

use std::time::Duration;

use strikeguard::MonitorConfig;
use strikeguard::app::ports::InterruptLine;
use strikeguard::error::{Error, InitError};
use strikeguard::status::MonitorState;

use crate::mock_hw::{fast_timing, rig, wait_until};

#[test]
fn init_exhaustion_is_fatal() {
    let mut config = MonitorConfig::default();
    config.system.auto_restart = false;
    let r = rig(config, fast_timing());
    r.chip.set_unresponsive(true);

    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Fatal));

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.recovery.init_attempts, 3);
    assert!(!snap.sensor_active);
    assert_eq!(
        r.monitor.status().lock().last_error,
        Some(Error::Init(InitError::RetriesExhausted(3)))
    );
    assert!(wait_until(Duration::from_secs(2), || !r.monitor.supervisor().is_monitor_alive()));
    r.monitor.shutdown();
}

#[test]
fn transient_bus_failure_is_retried() {
    let mut timing = fast_timing();
    timing.supervisor.init_attempts = 5;
    timing.supervisor.init_base_delay = Duration::from_millis(40);
    let r = rig(MonitorConfig::default(), timing);
    r.factory.set_unavailable(true);

    r.monitor.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || r.factory.opens() >= 2));
    r.factory.set_unavailable(false);

    assert!(r.wait_for_state(MonitorState::Monitoring));
    assert!(r.monitor.status_snapshot().recovery.init_attempts >= 2);
    r.monitor.shutdown();
}

#[test]
fn failing_health_checks_trigger_reinit() {
    let mut timing = fast_timing();
    timing.supervisor.health_interval = Duration::from_millis(20);
    timing.supervisor.health_failure_limit = 2;
    let r = rig(MonitorConfig::default(), timing);

    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    r.chip.set_scratch_stuck(true);
    assert!(wait_until(Duration::from_secs(3), || {
        r.monitor.status_snapshot().recovery.reinitializations >= 1
    }));

    r.chip.set_scratch_stuck(false);
    assert!(wait_until(Duration::from_secs(3), || {
        let s = r.monitor.status_snapshot();
        s.state == MonitorState::Monitoring && s.healthy
    }));
    assert!(r.line.is_attached(), "IRQ re-armed after re-init");
    r.monitor.shutdown();
}

#[test]
fn watchdog_restarts_a_dead_loop() {
    let mut timing = fast_timing();
    timing.supervisor.init_attempts = 1;
    timing.supervisor.watchdog_interval = Duration::from_millis(30);
    let r = rig(MonitorConfig::default(), timing);
    r.factory.set_unavailable(true);

    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Fatal));
    r.factory.set_unavailable(false);

    assert!(r.wait_for_state(MonitorState::Monitoring));
    let snap = r.monitor.status_snapshot();
    assert!(snap.recovery.watchdog_restarts >= 1);
    assert!(snap.monitor_thread_alive);
    r.monitor.shutdown();
}

#[test]
fn watchdog_gives_up_after_restart_ceiling() {
    let mut timing = fast_timing();
    timing.supervisor.init_attempts = 1;
    timing.supervisor.watchdog_interval = Duration::from_millis(20);
    timing.supervisor.restart_ceiling = 2;
    let r = rig(MonitorConfig::default(), timing);
    r.chip.set_unresponsive(true);

    r.monitor.start().unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        !r.monitor.supervisor().is_watchdog_alive()
    }));

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.state, MonitorState::Fatal);
    assert!(snap.recovery.watchdog_restarts >= 2);
    assert!(!snap.monitor_thread_alive);
    r.monitor.shutdown();
}

#[test]
fn stop_during_reinit_backoff_reports_stopped() {
    let mut timing = fast_timing();
    timing.supervisor.health_interval = Duration::from_millis(20);
    timing.supervisor.health_failure_limit = 1;
    timing.supervisor.init_base_delay = Duration::from_secs(10);
    let r = rig(MonitorConfig::default(), timing);

    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    r.chip.set_unresponsive(true);
    assert!(wait_until(Duration::from_secs(3), || {
        r.monitor.status_snapshot().recovery.reinitializations >= 1
    }));
    assert!(r.monitor.stop());
    assert_eq!(r.state(), MonitorState::Stopped);
    assert!(!r.monitor.status_snapshot().sensor_active);
    r.monitor.shutdown();
}

#[test]
fn start_is_refused_while_the_old_loop_lingers() {
    let mut timing = fast_timing();
    timing.join_timeout = Duration::from_millis(30);
    let r = rig(MonitorConfig::default(), timing);
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    // Teardown needs the sensor lock, so the loop cannot finish yet.
    let held = r.monitor.sensor().lock();
    assert!(!r.monitor.stop());
    assert!(r.monitor.supervisor().is_monitor_alive());
    assert!(matches!(r.monitor.start(), Err(Error::Busy(_))));
    drop(held);

    assert!(wait_until(Duration::from_secs(2), || {
        !r.monitor.supervisor().is_monitor_alive()
    }));
    assert_eq!(r.state(), MonitorState::Stopped);

    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));
    assert!(r.line.is_attached());
    r.monitor.shutdown();
}
