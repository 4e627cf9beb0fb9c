//! Application layer: loops, sessions and the service that wires them.
//!
//! The control and learning logic lives in the domain modules
//! (`control`, `learning`, `runner`, `safety`, `watchdog`).  This layer
//! schedules it: a sensor loop, a watchdog loop, one control session at
//! a time and a notification worker.  All interaction with hardware
//! happens through the **port traits** defined in [`ports`], keeping
//! every loop testable without real peripherals.

pub mod commands;
pub mod control_loop;
pub mod notify;
pub mod ports;
pub mod sensor_loop;
pub mod service;
