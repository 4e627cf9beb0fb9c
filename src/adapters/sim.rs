//! Simulated gas kiln.
//!
//! First-order thermal model:
//!
//! ```text
//!   dT/dt = gain · valve · [solenoid open]  −  loss · (T − ambient)
//! ```
//!
//! with `gain` in °C/h per percent of valve opening and `loss` in 1/h.
//! Between two reads the model is advanced with the exact exponential
//! solution, so large time steps (scaled clocks) stay stable.
//!
//! One [`SimulatedKiln`] handle implements the sensor, valve and solenoid
//! ports; clones share the same kiln.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::debug;

use crate::app::ports::{Clock, SensorReading, SensorPort, SolenoidPort, ValvePort};
use crate::error::ActuatorError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KilnModel {
    pub ambient: f64,
    /// °C/h per % of valve opening.
    pub gain: f64,
    /// Newtonian loss coefficient, 1/h.
    pub loss: f64,
    /// Cold-junction rise above ambient at full chamber temperature.
    pub cold_junction_rise: f64,
}

impl Default for KilnModel {
    fn default() -> Self {
        Self {
            ambient: 20.0,
            gain: 25.0,
            loss: 1.0,
            cold_junction_rise: 15.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    temperature: f64,
    valve: f64,
    solenoid_open: bool,
    sensor_connected: bool,
    last_time: Option<f64>,
    commands: u32,
}

#[derive(Clone)]
pub struct SimulatedKiln {
    model: KilnModel,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<CriticalSectionRawMutex, RefCell<SimState>>>,
}

impl SimulatedKiln {
    pub fn new(model: KilnModel, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(SimState {
                temperature: model.ambient,
                valve: 0.0,
                solenoid_open: false,
                sensor_connected: true,
                last_time: None,
                commands: 0,
            }))),
            model,
            clock,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Integrate up to the clock's current time.
    fn advance(&self) -> f64 {
        let now = self.clock.now_secs();
        let m = self.model;
        self.with(|s| {
            if let Some(last) = s.last_time {
                let hours = ((now - last) / 3600.0).max(0.0);
                let drive = if s.solenoid_open { s.valve } else { 0.0 };
                let equilibrium = m.ambient + m.gain * drive / m.loss;
                s.temperature = equilibrium + (s.temperature - equilibrium) * (-m.loss * hours).exp();
            }
            s.last_time = Some(now);
            s.temperature
        })
    }

    pub fn temperature(&self) -> f64 {
        self.advance()
    }

    pub fn set_temperature(&self, temp: f64) {
        self.advance();
        self.with(|s| s.temperature = temp);
    }

    /// Simulate a broken thermocouple (or its repair).
    pub fn set_sensor_connected(&self, connected: bool) {
        self.with(|s| s.sensor_connected = connected);
    }

    pub fn solenoid_open(&self) -> bool {
        self.with(|s| s.solenoid_open)
    }

    /// Valve commands accepted so far.
    pub fn valve_commands(&self) -> u32 {
        self.with(|s| s.commands)
    }
}

impl SensorPort for SimulatedKiln {
    fn read(&mut self) -> SensorReading {
        let hot = self.advance();
        if !self.with(|s| s.sensor_connected) {
            return SensorReading::unavailable();
        }
        let m = self.model;
        let cold = m.ambient + m.cold_junction_rise * ((hot - m.ambient) / 1300.0).clamp(0.0, 1.0);
        SensorReading {
            hot,
            cold,
            connected: true,
        }
    }
}

impl ValvePort for SimulatedKiln {
    fn set_position(&self, percent: f64) -> Result<f64, ActuatorError> {
        if !percent.is_finite() {
            return Err(ActuatorError::CommandFailed);
        }
        self.advance();
        let pos = percent.clamp(0.0, 100.0);
        self.with(|s| {
            s.valve = pos;
            s.commands += 1;
        });
        debug!("SIM | valve {pos:.1}%");
        Ok(pos)
    }

    fn emergency_close(&self) -> Result<(), ActuatorError> {
        self.advance();
        self.with(|s| s.valve = 0.0);
        Ok(())
    }

    fn position(&self) -> f64 {
        self.with(|s| s.valve)
    }
}

impl SolenoidPort for SimulatedKiln {
    fn set_energized(&self, energized: bool) -> Result<(), ActuatorError> {
        self.advance();
        self.with(|s| s.solenoid_open = energized);
        Ok(())
    }
}
