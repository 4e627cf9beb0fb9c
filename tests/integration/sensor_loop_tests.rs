//! Sensor loop against scripted readings: emergency edges, outage and
//! reconnect alerts, fast-cooling episodes and operator reset.

use std::sync::Arc;

use kilnctl::adapters::time::ManualClock;
use kilnctl::app::control_loop::{SessionKind, SessionSlot};
use kilnctl::app::commands::SensorCommand;
use kilnctl::app::notify::{Notification, NotificationDispatcher, NotificationWorker};
use kilnctl::app::sensor_loop::SensorLoop;
use kilnctl::config::KilnConfig;
use kilnctl::drivers::solenoid::SolenoidValve;
use kilnctl::drivers::valve::GuardedValve;
use kilnctl::safety::{AlarmCode, SafetyReport};
use kilnctl::sensors::TemperatureSample;
use kilnctl::sync::{CancelToken, StopReason, Subscriber, snapshot};
use kilnctl::watchdog::Watchdog;

use super::mock_hw::{MockSolenoid, MockValve, RecordingNotifier, ScriptedSensor};

struct Rig {
    sensor_loop: SensorLoop,
    sensor: ScriptedSensor,
    clock: Arc<ManualClock>,
    raw: MockValve,
    valve: Arc<GuardedValve>,
    slot: SessionSlot,
    worker: NotificationWorker,
    notifier: RecordingNotifier,
    samples: Subscriber<TemperatureSample>,
    safety: Subscriber<SafetyReport>,
}

impl Rig {
    fn new(start_temp: f64) -> Self {
        let config = KilnConfig::default();
        let clock = Arc::new(ManualClock::new(0.0));
        let sensor = ScriptedSensor::at(start_temp);
        let raw = MockValve::new();
        let valve = Arc::new(GuardedValve::new(Arc::new(raw.clone())));
        let solenoid = Arc::new(SolenoidValve::new(Some(Arc::new(MockSolenoid::new()))));
        let notifier = RecordingNotifier::new();
        let (notify, worker) = NotificationDispatcher::new(Box::new(notifier.clone()));
        let watchdog = Arc::new(Watchdog::new(
            &config.watchdog,
            clock.clone(),
            solenoid,
            valve.clone(),
            notify.clone(),
        ));
        let slot = SessionSlot::new();
        let (sample_tx, samples) = snapshot(TemperatureSample::default());
        let (safety_tx, safety) = snapshot(SafetyReport::default());
        let sensor_loop = SensorLoop::new(
            &config,
            Box::new(sensor.clone()),
            clock.clone(),
            watchdog,
            valve.clone(),
            notify,
            slot.clone(),
            sample_tx,
            safety_tx,
        );
        Self {
            sensor_loop,
            sensor,
            clock,
            raw,
            valve,
            slot,
            worker,
            notifier,
            samples,
            safety,
        }
    }

    /// Advance the clock by `secs` and run one tick, delivering any
    /// notifications it queued.
    fn tick_after(&mut self, secs: f64) -> kilnctl::app::sensor_loop::TickReport {
        self.clock.advance(secs);
        let report = self.sensor_loop.tick();
        self.worker.flush();
        report
    }
}

#[test]
fn normal_tick_publishes_sample_and_safe_report() {
    let mut rig = Rig::new(450.0);
    let report = rig.tick_after(2.0);
    assert!(report.safety.is_safe);
    assert!(!report.emergency_triggered);
    let sample = rig.samples.read();
    assert!(sample.connected);
    assert_eq!(sample.hot, 450.0);
    assert_eq!(sample.timestamp, 2.0);
    assert!(rig.safety.read().is_safe);
    assert!(rig.notifier.sent().is_empty());
}

#[test]
fn over_temperature_latches_valve_and_cancels_session_once() {
    let mut rig = Rig::new(1000.0);
    let token = CancelToken::new();
    assert!(rig.slot.claim(SessionKind::Program, token.clone()));
    rig.tick_after(2.0);

    rig.sensor.set(1320.0);
    let report = rig.tick_after(2.0);
    assert!(report.emergency_triggered);
    assert!(report.safety.has(AlarmCode::OverTemp));
    assert!(rig.valve.is_latched());
    assert_eq!(rig.raw.emergency_closes(), 1);
    assert_eq!(token.reason(), Some(StopReason::Emergency));

    // still hot: the latch holds but nothing fires twice
    let again = rig.tick_after(2.0);
    assert!(again.safety.emergency_stop);
    assert!(!again.emergency_triggered);
    assert_eq!(rig.raw.emergency_closes(), 1);
    assert_eq!(rig.notifier.count(&Notification::over_temp(1320.0)), 1);
    assert_eq!(rig.notifier.count(&Notification::emergency_stop("")), 1);
}

#[test]
fn emergency_stays_latched_after_temperature_drops() {
    let mut rig = Rig::new(1320.0);
    assert!(rig.tick_after(2.0).emergency_triggered);
    rig.sensor.set(900.0);
    let report = rig.tick_after(2.0);
    assert!(report.safety.emergency_stop);
    assert!(rig.sensor_loop.monitor().is_emergency());
}

#[test]
fn sensor_outage_alerts_once_and_reconnect_alerts_once() {
    let mut rig = Rig::new(300.0);
    rig.tick_after(2.0);

    rig.sensor.disconnect();
    let first = rig.tick_after(2.0);
    assert!(first.emergency_triggered);
    assert!(first.safety.has(AlarmCode::SensorError));
    assert!(!first.sample.connected);
    // the last good temperature is carried while disconnected
    assert_eq!(first.sample.hot, 300.0);
    for _ in 0..3 {
        rig.tick_after(2.0);
    }
    assert_eq!(rig.notifier.count(&Notification::sensor_error()), 1);
    assert!(rig.valve.is_latched());

    rig.sensor.set(305.0);
    rig.tick_after(2.0);
    rig.tick_after(2.0);
    assert_eq!(rig.notifier.count(&Notification::sensor_reconnect(305.0)), 1);
    assert!(rig.samples.read().connected);
}

#[test]
fn fast_cooling_notifies_once_per_episode() {
    let mut rig = Rig::new(600.0);
    rig.tick_after(60.0);
    for k in 1..=4 {
        rig.sensor.set(600.0 - f64::from(k) * 10.0);
        let report = rig.tick_after(60.0);
        assert!(report.safety.has(AlarmCode::FastCooling));
        assert!(report.safety.is_safe);
    }
    assert_eq!(rig.notifier.count(&Notification::fast_cooling(0.0)), 1);
    assert!(!rig.valve.is_latched());
}

#[test]
fn reset_command_clears_monitor_on_next_tick() {
    let mut rig = Rig::new(1320.0);
    assert!(rig.tick_after(2.0).emergency_triggered);
    rig.sensor.set(800.0);
    rig.sensor_loop
        .commands()
        .try_send(SensorCommand::ResetEmergency)
        .unwrap();
    let report = rig.tick_after(2.0);
    assert!(!report.safety.emergency_stop);
    assert!(!rig.sensor_loop.monitor().is_emergency());

    // a new excursion latches again
    rig.valve.release();
    rig.sensor.set(1330.0);
    assert!(rig.tick_after(2.0).emergency_triggered);
    assert_eq!(rig.raw.emergency_closes(), 2);
}
