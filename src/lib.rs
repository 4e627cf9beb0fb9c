//! Kiln controller library.
//!
//! Exposes the control, safety and learning modules for the binary,
//! integration tests and simulation.  Hardware is reached only through
//! the port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod firing_log;
pub mod fsm;
pub mod learning;
pub mod program;
pub mod runner;
pub mod safety;
pub mod sensors;
pub mod storage;
pub mod sync;
pub mod watchdog;

pub use error::{Error, Result};
