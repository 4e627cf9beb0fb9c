//! Actuator drivers layered over the raw ports.

pub mod solenoid;
pub mod valve;
