//! Fail-safe gas solenoid driver.
//!
//! Normally closed: the coil must be energised to let gas through, so a
//! power loss, a crashed process or a cut wire all close the supply.  The
//! watchdog de-energises it first on any trigger because it is faster
//! than driving the proportional valve shut.
//!
//! ## Dual-mode design
//!
//! With `enabled = false` (no solenoid fitted) the driver only tracks the
//! commanded state and reports success, so the rest of the shutdown chain
//! still runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use crate::app::ports::SolenoidPort;
use crate::error::ActuatorError;

pub struct SolenoidValve {
    port: Option<Arc<dyn SolenoidPort>>,
    open: AtomicBool,
}

impl SolenoidValve {
    /// `port = None` gives a simulated solenoid.
    pub fn new(port: Option<Arc<dyn SolenoidPort>>) -> Self {
        if port.is_none() {
            info!("SOLENOID | not fitted, simulated");
        }
        Self {
            port,
            open: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.port.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Energise: gas supply available.
    pub fn open(&self) -> Result<(), ActuatorError> {
        if let Some(port) = &self.port {
            port.set_energized(true)?;
        }
        self.open.store(true, Ordering::Release);
        info!("SOLENOID | open");
        Ok(())
    }

    /// De-energise: gas supply cut.  The state is recorded as closed even
    /// if the driver reports a fault; a de-energised coil closes by design.
    pub fn close(&self) -> Result<(), ActuatorError> {
        self.open.store(false, Ordering::Release);
        match &self.port {
            Some(port) => port.set_energized(false).inspect_err(|e| {
                error!("SOLENOID | close reported {e}");
            }),
            None => Ok(()),
        }
    }
}
