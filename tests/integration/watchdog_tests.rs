//! Watchdog supervision driven by a real sensor loop on a manual clock.

use std::sync::Arc;

use kilnctl::adapters::time::ManualClock;
use kilnctl::app::control_loop::SessionSlot;
use kilnctl::app::notify::{Notification, NotificationDispatcher, NotificationWorker};
use kilnctl::app::sensor_loop::SensorLoop;
use kilnctl::config::KilnConfig;
use kilnctl::drivers::solenoid::SolenoidValve;
use kilnctl::drivers::valve::GuardedValve;
use kilnctl::safety::SafetyReport;
use kilnctl::sensors::TemperatureSample;
use kilnctl::sync::snapshot;
use kilnctl::watchdog::{CheckOutcome, TriggerReason, Watchdog};

use super::mock_hw::{MockSolenoid, MockValve, RecordingNotifier, ScriptedSensor};

struct Rig {
    watchdog: Arc<Watchdog>,
    sensor_loop: SensorLoop,
    sensor: ScriptedSensor,
    clock: Arc<ManualClock>,
    coil: MockSolenoid,
    raw: MockValve,
    valve: Arc<GuardedValve>,
    worker: NotificationWorker,
    notifier: RecordingNotifier,
}

fn rig() -> Rig {
    let config = KilnConfig::default();
    let clock = Arc::new(ManualClock::new(0.0));
    let sensor = ScriptedSensor::at(500.0);
    let coil = MockSolenoid::new();
    let raw = MockValve::new();
    let valve = Arc::new(GuardedValve::new(Arc::new(raw.clone())));
    let solenoid = Arc::new(SolenoidValve::new(Some(Arc::new(coil.clone()))));
    let notifier = RecordingNotifier::new();
    let (notify, worker) = NotificationDispatcher::new(Box::new(notifier.clone()));
    let watchdog = Arc::new(Watchdog::new(
        &config.watchdog,
        clock.clone(),
        solenoid,
        valve.clone(),
        notify.clone(),
    ));
    let (sample_tx, _) = snapshot(TemperatureSample::default());
    let (safety_tx, _) = snapshot(SafetyReport::default());
    let sensor_loop = SensorLoop::new(
        &config,
        Box::new(sensor.clone()),
        clock.clone(),
        watchdog.clone(),
        valve.clone(),
        notify,
        SessionSlot::new(),
        sample_tx,
        safety_tx,
    );
    watchdog.start().unwrap();
    Rig {
        watchdog,
        sensor_loop,
        sensor,
        clock,
        coil,
        raw,
        valve,
        worker,
        notifier,
    }
}

#[test]
fn start_opens_the_solenoid() {
    let r = rig();
    assert!(r.coil.energized());
    assert!(r.watchdog.status().solenoid_open);
}

#[test]
fn live_sensor_loop_keeps_watchdog_healthy() {
    let mut r = rig();
    for _ in 0..30 {
        r.clock.advance(2.0);
        r.sensor_loop.tick();
        assert_eq!(r.watchdog.check(), CheckOutcome::Healthy);
    }
    assert!(r.coil.energized());
    assert!(!r.valve.is_latched());
}

#[test]
fn stalled_sensor_loop_trips_heartbeat_and_cuts_gas() {
    let mut r = rig();
    r.sensor_loop.tick();
    r.clock.advance(16.0);

    let CheckOutcome::Triggered(report) = r.watchdog.check() else {
        panic!("expected a trigger");
    };
    assert!(matches!(report.reason, TriggerReason::HeartbeatStale { .. }));
    assert_eq!(report.solenoid, Ok(()));
    assert_eq!(report.valve, Ok(()));
    assert!(report.notified);
    assert!(!r.coil.energized());
    assert!(r.valve.is_latched());
    assert_eq!(r.raw.emergency_closes(), 1);

    assert_eq!(r.watchdog.check(), CheckOutcome::AlreadyTriggered);
    r.worker.flush();
    assert_eq!(r.notifier.count(&Notification::watchdog_emergency("", 1)), 1);
}

#[test]
fn disconnected_sensor_trips_sensor_timeout() {
    let mut r = rig();
    r.sensor_loop.tick();
    r.sensor.disconnect();
    // heartbeat stays fresh, readings do not
    let mut outcome = CheckOutcome::Healthy;
    for _ in 0..20 {
        r.clock.advance(2.0);
        r.sensor_loop.tick();
        outcome = r.watchdog.check();
        if outcome != CheckOutcome::Healthy {
            break;
        }
    }
    let CheckOutcome::Triggered(report) = outcome else {
        panic!("expected a sensor timeout");
    };
    assert!(matches!(report.reason, TriggerReason::SensorStale { age } if age > 30.0));
}

#[test]
fn last_good_reading_above_limit_trips_over_temperature() {
    let mut r = rig();
    r.sensor.set(1320.0);
    r.clock.advance(2.0);
    r.sensor_loop.tick();
    // the sensor loop already latched the valve; the watchdog still cuts the solenoid
    let CheckOutcome::Triggered(report) = r.watchdog.check() else {
        panic!("expected an over-temperature trigger");
    };
    assert_eq!(
        report.reason,
        TriggerReason::OverTemperature {
            temp: 1320.0,
            limit: 1310.0
        }
    );
    assert!(!r.coil.energized());
}

#[test]
fn alerts_inside_cooldown_are_suppressed() {
    let r = rig();
    r.clock.advance(16.0);
    assert!(matches!(r.watchdog.check(), CheckOutcome::Triggered(t) if t.notified));

    r.watchdog.reset().unwrap();
    assert!(r.coil.energized());
    r.clock.advance(16.0);
    let CheckOutcome::Triggered(second) = r.watchdog.check() else {
        panic!("expected a second trigger");
    };
    assert!(!second.notified);
    assert_eq!(r.watchdog.status().trigger_count, 2);

    r.watchdog.reset().unwrap();
    r.clock.advance(61.0);
    assert!(matches!(r.watchdog.check(), CheckOutcome::Triggered(t) if t.notified));
}

#[test]
fn reset_reopens_solenoid_but_leaves_valve_latch_alone() {
    let r = rig();
    r.clock.advance(16.0);
    r.watchdog.check();
    r.watchdog.reset().unwrap();
    assert!(!r.watchdog.is_triggered());
    assert!(r.coil.energized());
    assert!(r.valve.is_latched());
    r.valve.release();
    assert!(!r.valve.is_latched());
}
