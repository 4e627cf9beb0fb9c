//! Temperature domain: the published sample and the filters derived from raw readings.
//!
//! The sensor loop turns each [`SensorReading`](crate::app::ports::SensorReading)
//! into a [`TemperatureSample`] and publishes it.  Two small filters live
//! here: the runner's [`SmoothingWindow`] (running mean) and the
//! [`CoolingRateTracker`] feeding the thermal-shock check.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Point-in-time temperature snapshot published by the sensor loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    /// Chamber temperature, °C.
    pub hot: f64,
    /// Cold-junction temperature, °C.
    pub cold: f64,
    /// `hot - cold`.
    pub delta: f64,
    pub connected: bool,
    /// Monotonic seconds at which the reading was taken.
    pub timestamp: f64,
    /// Rate of change over the cooling window, °C/h (negative while cooling).
    pub cooling_rate: f64,
}

impl TemperatureSample {
    pub fn new(hot: f64, cold: f64, timestamp: f64) -> Self {
        Self {
            hot,
            cold,
            delta: hot - cold,
            connected: true,
            timestamp,
            cooling_rate: 0.0,
        }
    }

    /// A sample for a failed read.  Temperatures carry the last known
    /// values so downstream checks still have something to compare.
    pub fn disconnected(last: &Self, timestamp: f64) -> Self {
        Self {
            connected: false,
            timestamp,
            ..*last
        }
    }
}

impl Default for TemperatureSample {
    fn default() -> Self {
        Self {
            hot: 0.0,
            cold: 0.0,
            delta: 0.0,
            connected: false,
            timestamp: 0.0,
            cooling_rate: 0.0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Smoothing
// ───────────────────────────────────────────────────────────────

/// Fixed-size running mean.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SmoothingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a reading and return the new mean.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.mean().unwrap_or(value)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Cooling rate
// ───────────────────────────────────────────────────────────────

/// Rolling history of `(t, T)` used to estimate the current rate of change.
#[derive(Debug, Clone)]
pub struct CoolingRateTracker {
    history: VecDeque<(f64, f64)>,
    capacity: usize,
    window_secs: f64,
    min_temp: f64,
    max_temp: f64,
}

impl CoolingRateTracker {
    pub fn new(capacity: usize, window_secs: f64, min_temp: f64, max_temp: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(2),
            window_secs,
            min_temp,
            max_temp,
        }
    }

    /// Record a connected reading and return the rate for it.
    ///
    /// Outside the (min, max) band the rate reports 0: above it the kiln
    /// is past the thermal-shock range, below it the signal is noise.
    pub fn record(&mut self, timestamp: f64, temp: f64) -> f64 {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((timestamp, temp));

        if temp > self.min_temp && temp < self.max_temp {
            self.rate_per_hour()
        } else {
            0.0
        }
    }

    /// °C/h between the oldest and newest point inside the window,
    /// rounded to 0.1.
    pub fn rate_per_hour(&self) -> f64 {
        let Some(&(now, _)) = self.history.back() else {
            return 0.0;
        };
        let cutoff = now - self.window_secs;
        let mut recent = self.history.iter().filter(|(t, _)| *t >= cutoff);
        let Some(&(t0, temp0)) = recent.next() else {
            return 0.0;
        };
        let Some(&(t1, temp1)) = recent.last() else {
            return 0.0;
        };
        let dt = t1 - t0;
        if dt <= 0.0 {
            return 0.0;
        }
        ((temp1 - temp0) / dt * 3600.0 * 10.0).round() / 10.0
    }
}
