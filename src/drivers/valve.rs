//! Guarded gas valve.
//!
//! Wraps the raw [`ValvePort`] with an emergency latch shared by every
//! shutdown path (safety monitor, watchdog, operator):
//!
//! ```text
//!   runner ──set_position──▶ GuardedValve ──▶ ValvePort
//!                              ▲   latch
//!   monitor / watchdog ──emergency_close──┘
//! ```
//!
//! Once latched, opening commands are refused until [`GuardedValve::release`].
//! A latch that lands while `set_position` is mid-call is honoured by
//! re-issuing the close once that call returns; a failed re-close is
//! reported instead of the latch error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{error, info, warn};

use crate::app::ports::ValvePort;
use crate::error::ActuatorError;

pub struct GuardedValve {
    inner: Arc<dyn ValvePort>,
    latched: AtomicBool,
    emergency_closes: AtomicU32,
}

impl GuardedValve {
    pub fn new(inner: Arc<dyn ValvePort>) -> Self {
        Self {
            inner,
            latched: AtomicBool::new(false),
            emergency_closes: AtomicU32::new(0),
        }
    }

    /// Command an aperture.  Refused while the emergency latch is set.
    pub fn set_position(&self, percent: f64) -> Result<f64, ActuatorError> {
        if self.is_latched() {
            return Err(ActuatorError::EmergencyLatched);
        }
        let result = self.inner.set_position(percent.clamp(0.0, 100.0));
        if self.is_latched() {
            // An emergency landed while the command was in flight.
            warn!("VALVE | emergency during set_position, re-closing");
            if let Err(e) = self.inner.emergency_close() {
                error!("VALVE | re-close after in-flight command failed: {e}");
                return Err(e);
            }
            return Err(ActuatorError::EmergencyLatched);
        }
        result
    }

    /// Latch and close.  Idempotent; every call re-issues the close.
    pub fn emergency_close(&self) -> Result<(), ActuatorError> {
        if !self.latched.swap(true, Ordering::AcqRel) {
            error!("VALVE | emergency close, latch set");
        }
        self.emergency_closes.fetch_add(1, Ordering::Relaxed);
        self.inner.emergency_close()
    }

    /// Clear the latch after a manual reset.  The valve stays closed.
    pub fn release(&self) {
        if self.latched.swap(false, Ordering::AcqRel) {
            info!("VALVE | emergency latch released");
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    pub fn position(&self) -> f64 {
        self.inner.position()
    }

    pub fn emergency_close_count(&self) -> u32 {
        self.emergency_closes.load(Ordering::Relaxed)
    }
}

impl ValvePort for GuardedValve {
    fn set_position(&self, percent: f64) -> Result<f64, ActuatorError> {
        GuardedValve::set_position(self, percent)
    }

    fn emergency_close(&self) -> Result<(), ActuatorError> {
        GuardedValve::emergency_close(self)
    }

    fn position(&self) -> f64 {
        GuardedValve::position(self)
    }
}
