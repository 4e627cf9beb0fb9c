//! Inbound commands to the kiln service.
//!
//! These represent actions requested by the outside world (CLI, a future
//! web API) that [`KilnService`](super::service::KilnService) interprets
//! and acts upon.

use crate::learning::learner::LearnerMode;
use crate::program::Program;

/// Commands that external adapters can send into the service.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Begin a firing.  Refused while another session runs.
    StartProgram(Program),

    /// Stop the active firing (or autotune) and close the valve.
    StopProgram,

    /// Latch the valve closed and abort whatever is running.
    EmergencyStop,

    /// Relay autotune at the given test temperature (default from config).
    StartAutotune(Option<f64>),

    StopAutotune,

    /// Operator acknowledgement: clear monitor, watchdog and valve latches.
    ResetEmergency,

    /// Analyze every stored firing and feed the results to the learner.
    Learn,

    ApproveAdjustments,

    RejectAdjustments,

    SetLearnerMode(LearnerMode),

    /// Restore one band's base gains.
    RollbackBand(u32),

    RollbackAll,
}

/// Commands the service forwards to the sensor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    ResetEmergency,
}
