//! PID controller for the gas valve
//!
//! Proportional-integral-derivative law turning setpoint and measured
//! chamber temperature into a valve aperture (0–100 %).  The integral
//! accumulator is clamped (anti-windup) and survives gain changes so a
//! live gain schedule does not throw away accumulated correction.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::PidConfig;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Internal terms of the last computation, for logging and analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub integral: f64,
    pub error: f64,
    pub output: f64,
    pub dt: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// PID controller
pub struct PidController {
    gains: PidGains,
    integral: f64,
    prev_error: f64,
    prev_time: Option<f64>,
    integral_min: f64,
    integral_max: f64,
    output_min: f64,
    output_max: f64,
    dt_fallback: f64,
    dt_anomalies: u64,
    last: PidTerms,
}

impl PidController {
    pub fn new(config: &PidConfig) -> Self {
        Self {
            gains: PidGains::new(config.kp, config.ki, config.kd),
            integral: 0.0,
            prev_error: 0.0,
            prev_time: None,
            integral_min: config.integral_min,
            integral_max: config.integral_max,
            output_min: config.output_min,
            output_max: config.output_max,
            dt_fallback: config.dt_fallback_secs,
            dt_anomalies: 0,
            last: PidTerms::default(),
        }
    }

    /// Compute the valve command for `measured` against `setpoint` at
    /// monotonic time `now` (seconds).
    pub fn compute(&mut self, setpoint: f64, measured: f64, now: f64) -> f64 {
        let error = setpoint - measured;

        let dt = match self.prev_time {
            Some(prev) if now - prev > 0.0 => now - prev,
            Some(prev) => {
                self.dt_anomalies += 1;
                warn!(
                    "PID | clock did not advance (dt={:.3}s), using {:.3}s",
                    now - prev,
                    self.dt_fallback
                );
                self.dt_fallback
            }
            None => self.dt_fallback,
        };

        // Proportional
        let p = self.gains.kp * error;

        // Integral (with anti-windup clamp)
        self.integral = (self.integral + error * dt).clamp(self.integral_min, self.integral_max);
        let i = self.gains.ki * self.integral;

        // Derivative
        let d = self.gains.kd * (error - self.prev_error) / dt;

        let output = (p + i + d).clamp(self.output_min, self.output_max);

        self.prev_error = error;
        self.prev_time = Some(now);
        self.last = PidTerms {
            p,
            i,
            d,
            integral: self.integral,
            error,
            output,
            dt,
            kp: self.gains.kp,
            ki: self.gains.ki,
            kd: self.gains.kd,
        };

        output
    }

    /// Swap gains without touching integral or derivative memory.
    pub fn set_tunings(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Zero integral and error memory and restart timing from `now`.
    pub fn reset(&mut self, now: f64) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.prev_time = Some(now);
        self.last = PidTerms::default();
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Terms of the most recent [`compute`](Self::compute).
    pub fn terms(&self) -> PidTerms {
        self.last
    }

    /// How many times a non-advancing clock forced the dt fallback.
    pub fn dt_anomalies(&self) -> u64 {
        self.dt_anomalies
    }
}
