//! Clock adapters.
//!
//! - [`SystemClock`]: `std::time::Instant`, real time.
//! - [`ScaledClock`]: real time multiplied by a factor, for running a
//!   simulated firing faster than life.
//! - [`ManualClock`]: only moves when told to; used by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::app::ports::Clock;

/// Monotonic seconds since construction.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Real elapsed time multiplied by `scale`.
pub struct ScaledClock {
    start: Instant,
    scale: f64,
}

impl ScaledClock {
    /// Scales below 1 are raised to 1.
    pub fn new(scale: f64) -> Self {
        Self {
            start: Instant::now(),
            scale: if scale.is_finite() { scale.max(1.0) } else { 1.0 },
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Clock for ScaledClock {
    fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * self.scale
    }
}

/// Test clock.  Stores the `f64` bit pattern in an atomic so it can be
/// shared across threads without a lock.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) -> f64 {
        let now = self.now_secs() + secs;
        self.set(now);
        now
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
