//! End-to-end: IRQ edge → register read → alert → notification → status.

use std::time::{Duration, Instant};

use strikeguard::app::ports::InterruptLine;
use strikeguard::drivers::as3935::registers::REG_NOISE_WDTH;
use strikeguard::events::{AlertLevel, Distance, InterruptReason, NoiseMode};
use strikeguard::notify::{Admission, DeliveryPolicy, Severity};
use strikeguard::status::MonitorState;
use strikeguard::{Error, MonitorCommand, MonitorConfig};

use crate::mock_hw::{fast_timing, notifying_config, rig, rig_with_policy, wait_until};

#[test]
fn close_strike_is_announced_and_recorded() {
    let r = rig(notifying_config(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));
    assert!(r.line.is_attached());

    r.chip.set_lightning(8, 250_000);
    assert!(r.edge());

    assert!(wait_until(Duration::from_secs(2), || !r.delivered().is_empty()));
    let sent = r.delivered();
    assert_eq!(sent[0].severity, Severity::Critical);
    assert_eq!(sent[0].text, "CRITICAL: Lightning strike detected! Distance: 8km");
    assert_eq!(sent[0].distance_km, Some(8));

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.recent_events.len(), 1);
    let event = snap.recent_events[0];
    assert_eq!(event.distance, Distance::Km(8));
    assert_eq!(event.energy, 250_000);
    assert!(event.alert_sent);
    assert_eq!(event.alert_level, Some(AlertLevel::Critical));
    assert!(snap.alerts.critical_active);
    assert!(snap.monitor_thread_alive);

    let stats = r.monitor.shutdown().unwrap();
    assert_eq!(stats.delivered, 1);
}

#[test]
fn weak_or_distant_strikes_stay_quiet() {
    let r = rig(notifying_config(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    r.chip.set_lightning(5, 50_000);
    r.edge();
    r.chip.set_lightning(40, 900_000);
    r.edge();

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.recent_events.len(), 2);
    assert!(snap.recent_events.iter().all(|e| !e.alert_sent));
    assert!(!snap.alerts.warning_active && !snap.alerts.critical_active);
    r.monitor.shutdown();
    assert!(r.delivered().is_empty());
}

#[test]
fn disturber_burst_raises_floor_and_reset_restores_it() {
    let r = rig(MonitorConfig::default(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));
    let baseline = r.chip.register(REG_NOISE_WDTH);

    r.chip.set_interrupt(InterruptReason::DISTURBER);
    for _ in 0..15 {
        r.edge();
    }
    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.noise_mode, NoiseMode::High);
    assert_eq!(snap.interrupts.disturbers, 15);
    assert_eq!(r.chip.register(REG_NOISE_WDTH) >> 4, 5);

    r.monitor.handle_command(MonitorCommand::ResetAlerts).unwrap();
    assert_eq!(r.monitor.status_snapshot().noise_mode, NoiseMode::Normal);
    assert_eq!(r.chip.register(REG_NOISE_WDTH), baseline);
    r.monitor.shutdown();
}

#[test]
fn noise_high_goes_straight_to_critical() {
    let r = rig(MonitorConfig::default(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    r.chip.set_interrupt(InterruptReason::NOISE_HIGH);
    r.edge();
    assert_eq!(r.monitor.status_snapshot().noise_mode, NoiseMode::Critical);
    assert_eq!(r.chip.register(REG_NOISE_WDTH) >> 4, 7);
    r.monitor.shutdown();
}

#[test]
fn stop_releases_the_sensor_and_start_resumes() {
    let r = rig(MonitorConfig::default(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    assert!(r.monitor.stop());
    assert_eq!(r.state(), MonitorState::Stopped);
    assert!(!r.line.is_attached());
    assert!(r.line.release_count() >= 1);
    assert!(!r.monitor.status_snapshot().monitor_thread_alive);

    r.monitor.handle_command(MonitorCommand::Start).unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));
    assert!(r.line.is_attached());
    r.monitor.shutdown();
}

#[test]
fn test_alerts_need_debug_mode() {
    let r = rig(notifying_config(), fast_timing());
    let refused = r.monitor.inject_test_alert(AlertLevel::Warning);
    assert!(matches!(refused, Err(Error::Config(_))));
    assert_eq!(r.monitor.status_snapshot().recent_events.len(), 0);
    r.monitor.shutdown();

    let mut config = notifying_config();
    config.system.debug = true;
    let r = rig(config, fast_timing());
    r.monitor
        .handle_command(MonitorCommand::TestAlert { level: AlertLevel::Critical })
        .unwrap();

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.recent_events[0].distance, Distance::Km(8));
    assert_eq!(snap.recent_events[0].energy, 250_000);
    assert!(!snap.alerts.critical_active, "test alerts bypass the zones");

    assert!(wait_until(Duration::from_secs(2), || !r.delivered().is_empty()));
    assert_eq!(
        r.delivered()[0].text,
        "TEST CRITICAL: Lightning strike detected! Distance: 8km"
    );
    r.monitor.shutdown();
}

#[test]
fn test_notification_respects_enable_flag() {
    let r = rig(MonitorConfig::default(), fast_timing());
    assert_eq!(r.monitor.send_test_notification(), Admission::Disabled);
    assert!(r.monitor.handle_command(MonitorCommand::TestNotification).is_err());
    r.monitor.shutdown();

    let r = rig(notifying_config(), fast_timing());
    r.monitor.handle_command(MonitorCommand::TestNotification).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !r.delivered().is_empty()));
    assert_eq!(r.delivered()[0].severity, Severity::Info);
    r.monitor.shutdown();
}

#[test]
fn snapshot_serialises_for_the_status_page() {
    let r = rig(MonitorConfig::default(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    let json = serde_json::to_value(r.monitor.status_snapshot()).unwrap();
    assert_eq!(json["state"], "monitoring");
    assert_eq!(json["noise_mode"], "normal");
    assert_eq!(json["sensor_active"], true);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    r.monitor.shutdown();
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut config = MonitorConfig::default();
    config.alerts.warning_distance_km = 5;
    config.alerts.critical_distance_km = 10;
    let chip = strikeguard::drivers::as3935::sim::SimAs3935::new();
    let result = strikeguard::Monitor::with_timing(
        config,
        strikeguard::adapters::spi_bus::SimBusFactory::new(chip),
        std::sync::Arc::new(strikeguard::drivers::irq::SimIrqLine::new(9)),
        std::sync::Arc::new(strikeguard::adapters::time::ManualClock::new()),
        fast_timing(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn shutdown_flushes_a_rate_limited_backlog_promptly() {
    let r = rig_with_policy(notifying_config(), fast_timing(), DeliveryPolicy::default());
    for _ in 0..15 {
        assert_eq!(r.monitor.send_test_notification(), Admission::Queued);
    }

    let started = Instant::now();
    let stats = r.monitor.shutdown().expect("worker joined");
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(stats.delivered + stats.abandoned, 15);
    assert_eq!(r.delivered().len(), stats.delivered as usize);
}

#[test]
fn warning_range_strike_under_active_critical_is_not_alerted() {
    let r = rig(notifying_config(), fast_timing());
    r.monitor.start().unwrap();
    assert!(r.wait_for_state(MonitorState::Monitoring));

    r.chip.set_lightning(8, 250_000);
    r.edge();
    r.chip.set_lightning(25, 150_000);
    r.edge();

    let snap = r.monitor.status_snapshot();
    assert_eq!(snap.recent_events.len(), 2);
    assert_eq!(snap.recent_events[0].alert_level, Some(AlertLevel::Critical));
    assert!(snap.recent_events[0].alert_sent);
    assert_eq!(snap.recent_events[1].distance, Distance::Km(25));
    assert!(!snap.recent_events[1].alert_sent);
    assert_eq!(snap.recent_events[1].alert_level, None);
    assert!(snap.alerts.critical_active);
    assert!(!snap.alerts.warning_active);
    r.monitor.shutdown();
}
