//! Port traits: the hexagonal boundary between the control core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ KilnService / loops (domain)
//! ```
//!
//! The thermocouple driver, the valve actuator, the fail-safe solenoid,
//! notification delivery, time and persistence all sit behind these
//! traits, so the core never touches hardware or the filesystem directly
//! and every loop is testable with mock adapters.
//!
//! ## Safety notes
//!
//! - **ValvePort::emergency_close** must succeed even while another thread
//!   is inside `set_position`.  Implementations must not take a lock that
//!   `set_position` holds across its hardware call.
//! - **SolenoidPort** de-energised means closed.  Losing power closes the gas.
//! - All port errors are typed; callers handle every variant explicitly.

use core::fmt;

use crate::app::notify::Notification;
use crate::error::ActuatorError;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: thermocouple → domain)
// ───────────────────────────────────────────────────────────────

/// One raw reading from the thermocouple amplifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Hot junction (kiln chamber) temperature, °C.
    pub hot: f64,
    /// Cold junction (amplifier board) temperature, °C.
    pub cold: f64,
    /// False when the sensor could not be read; temperatures are then meaningless.
    pub connected: bool,
}

impl SensorReading {
    pub fn unavailable() -> Self {
        Self {
            hot: 0.0,
            cold: 0.0,
            connected: false,
        }
    }
}

/// Read-side port: the sensor loop calls this every polling period.
pub trait SensorPort: Send {
    fn read(&mut self) -> SensorReading;
}

// ───────────────────────────────────────────────────────────────
// Actuator ports (driven adapter: domain → valve / solenoid)
// ───────────────────────────────────────────────────────────────

/// Proportional gas valve.
pub trait ValvePort: Send + Sync {
    /// Command an aperture (0–100 %).  Returns the position actually
    /// reached, which may differ if the actuator hit a travel limit.
    fn set_position(&self, percent: f64) -> Result<f64, ActuatorError>;

    /// Drive the valve fully closed as fast as the hardware allows.
    fn emergency_close(&self) -> Result<(), ActuatorError>;

    /// Last known aperture (0–100 %).
    fn position(&self) -> f64;
}

/// Normally-closed fail-safe gas solenoid.
pub trait SolenoidPort: Send + Sync {
    /// `true` energises (opens) the solenoid, `false` de-energises (closes) it.
    fn set_energized(&self, energized: bool) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Notification port (driven adapter: domain → push service)
// ───────────────────────────────────────────────────────────────

/// Delivers a notification.  Called only from the notification worker
/// thread, never from a control or supervisory loop.
pub trait Notifier: Send {
    /// Returns `true` when the notification was accepted downstream.
    fn send(&mut self, notification: &Notification) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time source, in seconds since an arbitrary epoch.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> f64;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ files)
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value storage for gain tables, histories and firing logs.
///
/// Write operations MUST be atomic: a reader sees either the previous
/// value or the new one, never a partial write.
pub trait StoragePort: Send + Sync {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a value atomically and durably.
    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Every key in `namespace`, sorted ascending.
    fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Io(std::io::ErrorKind),
    /// Stored bytes could not be decoded.
    Corrupted,
    /// The stored document has a schema version this build does not read.
    Incompatible { found: u32, expected: u32 },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Io(kind) => write!(f, "I/O error: {kind}"),
            Self::Corrupted => write!(f, "stored data corrupted"),
            Self::Incompatible { found, expected } => {
                write!(f, "schema version {found}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for StorageError {}
