//! Closed-loop control: the PID itself, the valve step limiter, the relay
//! autotuner and the temperature-banded gain table with its scheduler.

pub mod adaptive;
pub mod autotune;
pub mod limiter;
pub mod pid;
pub mod scheduling;
