//! Mock kiln hardware for integration tests.
//!
//! Records every actuator call so tests can assert on the full command
//! history without a valve motor or solenoid coil attached.  Mocks are
//! cheap clones over shared state: hand one clone to the code under test
//! and keep another to inspect or script it.

use std::sync::{Arc, Mutex};

use kilnctl::app::notify::Notification;
use kilnctl::app::ports::{Notifier, SensorPort, SensorReading, SolenoidPort, ValvePort};
use kilnctl::error::ActuatorError;

// ── Actuator call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCall {
    SetValve(f64),
    EmergencyClose,
    Solenoid(bool),
}

// ── MockValve ─────────────────────────────────────────────────

#[derive(Default)]
struct ValveState {
    position: f64,
    fail: bool,
    calls: Vec<ActuatorCall>,
}

#[derive(Clone, Default)]
pub struct MockValve {
    state: Arc<Mutex<ValveState>>,
}

#[allow(dead_code)]
impl MockValve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set_position` fail.
    pub fn fail_commands(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_positions(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ActuatorCall::SetValve(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn emergency_closes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == ActuatorCall::EmergencyClose)
            .count()
    }
}

impl ValvePort for MockValve {
    fn set_position(&self, percent: f64) -> Result<f64, ActuatorError> {
        let mut s = self.state.lock().unwrap();
        if s.fail {
            return Err(ActuatorError::CommandFailed);
        }
        let position = percent.clamp(0.0, 100.0);
        s.position = position;
        s.calls.push(ActuatorCall::SetValve(position));
        Ok(position)
    }

    fn emergency_close(&self) -> Result<(), ActuatorError> {
        let mut s = self.state.lock().unwrap();
        s.position = 0.0;
        s.calls.push(ActuatorCall::EmergencyClose);
        Ok(())
    }

    fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }
}

// ── MockSolenoid ──────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockSolenoid {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
}

#[allow(dead_code)]
impl MockSolenoid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last commanded state; de-energised before any command.
    pub fn energized(&self) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|c| match c {
                ActuatorCall::Solenoid(on) => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl SolenoidPort for MockSolenoid {
    fn set_energized(&self, energized: bool) -> Result<(), ActuatorError> {
        self.calls
            .lock()
            .unwrap()
            .push(ActuatorCall::Solenoid(energized));
        Ok(())
    }
}

// ── ScriptedSensor ────────────────────────────────────────────

/// Returns whatever reading the test last scripted.
#[derive(Clone)]
pub struct ScriptedSensor {
    reading: Arc<Mutex<SensorReading>>,
}

#[allow(dead_code)]
impl ScriptedSensor {
    pub fn at(hot: f64) -> Self {
        Self {
            reading: Arc::new(Mutex::new(SensorReading {
                hot,
                cold: 25.0,
                connected: true,
            })),
        }
    }

    pub fn set(&self, hot: f64) {
        *self.reading.lock().unwrap() = SensorReading {
            hot,
            cold: 25.0,
            connected: true,
        };
    }

    pub fn disconnect(&self) {
        *self.reading.lock().unwrap() = SensorReading::unavailable();
    }
}

impl SensorPort for ScriptedSensor {
    fn read(&mut self) -> SensorReading {
        *self.reading.lock().unwrap()
    }
}

// ── RecordingNotifier ─────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.title).collect()
    }

    pub fn count(&self, notification: &Notification) -> usize {
        self.sent().iter().filter(|n| n.title == notification.title).count()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&mut self, notification: &Notification) -> bool {
        self.sent.lock().unwrap().push(notification.clone());
        true
    }
}
