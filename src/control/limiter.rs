//! Per-cycle valve slew limiter.
//!
//! A kiln responds to a valve change over minutes, so letting the PID
//! slam the valve from 0 to 100 % in one cycle only wears the actuator.
//! The limiter bounds each cycle's change to `max_step`.

use serde::{Deserialize, Serialize};

/// Result of limiting one command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitedCommand {
    /// Command actually sent to the valve.
    pub value: f64,
    /// Command the PID asked for (clamped to 0–100).
    pub requested: f64,
    /// True when the step limit changed the command.
    pub limited: bool,
}

#[derive(Debug, Clone)]
pub struct ValveRateLimiter {
    max_step: f64,
    previous: f64,
}

impl ValveRateLimiter {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step: max_step.abs(),
            previous: 0.0,
        }
    }

    /// Re-seed the previous output, e.g. with the valve's reported position.
    pub fn reset(&mut self, position: f64) {
        self.previous = position.clamp(0.0, 100.0);
    }

    pub fn limit(&mut self, requested: f64) -> LimitedCommand {
        let requested = requested.clamp(0.0, 100.0);
        let value = requested
            .clamp(self.previous - self.max_step, self.previous + self.max_step)
            .clamp(0.0, 100.0);
        self.previous = value;
        LimitedCommand {
            value,
            requested,
            limited: (value - requested).abs() > f64::EPSILON,
        }
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }
}
