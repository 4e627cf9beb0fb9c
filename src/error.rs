//! Unified error types for the kiln controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! service layer's error handling uniform.  Sub-enums are small and
//! `Clone` so they can travel through snapshots and reports without
//! borrowing from the code that raised them.

use core::fmt;

use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A program definition was rejected or cannot be started.
    Program(ProgramError),
    /// A valve or solenoid command failed.
    Actuator(ActuatorError),
    /// The relay autotuner could not start or produce gains.
    Autotune(AutotuneError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// A persisted document could not be read or written.
    Storage(StorageError),
    /// A control session is already running.
    Busy,
    /// The emergency latch is set; a manual reset is required.
    EmergencyLatched,
    /// No connected temperature reading is available.
    SensorUnavailable,
    /// A loop thread could not be spawned.
    Spawn(std::io::ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Program(e) => write!(f, "program: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Autotune(e) => write!(f, "autotune: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Busy => write!(f, "a control session is already active"),
            Self::EmergencyLatched => write!(f, "emergency latched, manual reset required"),
            Self::SensorUnavailable => write!(f, "no temperature reading available"),
            Self::Spawn(kind) => write!(f, "thread spawn failed: {kind}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Program errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ProgramError {
    /// The program has no segments.
    Empty,
    /// A segment failed load-time validation.
    InvalidSegment { index: usize, reason: &'static str },
    /// The program JSON could not be parsed.
    Parse(String),
    /// The runner is already executing a program.
    AlreadyRunning,
    /// No connected temperature reading is available to anchor the first ramp.
    NoTemperature,
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "program has no segments"),
            Self::InvalidSegment { index, reason } => {
                write!(f, "segment {}: {reason}", index + 1)
            }
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::AlreadyRunning => write!(f, "a program is already running"),
            Self::NoTemperature => write!(f, "no valid temperature reading"),
        }
    }
}

impl std::error::Error for ProgramError {}

impl From<ProgramError> for Error {
    fn from(e: ProgramError) -> Self {
        Self::Program(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The valve driver did not accept the command.
    CommandFailed,
    /// The emergency latch refuses any opening command.
    EmergencyLatched,
    /// The solenoid coil could not be switched.
    SolenoidFault,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed => write!(f, "valve command failed"),
            Self::EmergencyLatched => write!(f, "valve locked by emergency latch"),
            Self::SolenoidFault => write!(f, "solenoid fault"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Autotune errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AutotuneError {
    /// A session is already in progress.
    AlreadyRunning,
    /// The requested test temperature is outside the allowed range.
    InvalidTarget(f64),
    /// Fewer crossings than needed to estimate the period.
    InsufficientCrossings(usize),
    /// Too few peaks, or no max/min pair, to estimate the amplitude.
    InsufficientPeaks(usize),
    /// The measured oscillation amplitude was not positive.
    ZeroAmplitude,
    /// The hard duration ceiling was reached.
    Timeout,
}

impl fmt::Display for AutotuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "autotune already running"),
            Self::InvalidTarget(t) => write!(f, "invalid test temperature {t:.0}\u{00b0}C"),
            Self::InsufficientCrossings(n) => write!(f, "insufficient crossings ({n})"),
            Self::InsufficientPeaks(n) => write!(f, "insufficient peaks ({n})"),
            Self::ZeroAmplitude => write!(f, "oscillation amplitude is zero"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl From<AutotuneError> for Error {
    fn from(e: AutotuneError) -> Self {
        Self::Autotune(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::ErrorKind),
    /// The file is not valid JSON for `KilnConfig`.
    Parse(String),
    /// A value is out of its safe range.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Spawn(e.kind())
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
