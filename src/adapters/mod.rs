//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements                           | Connects to            |
//! |--------------|--------------------------------------|------------------------|
//! | `json_store` | StoragePort                          | JSON files / memory    |
//! | `log_sink`   | Notifier                             | `log` output           |
//! | `sim`        | SensorPort, ValvePort, SolenoidPort  | simulated kiln model   |
//! | `time`       | Clock                                | `Instant`, manual time |

pub mod json_store;
pub mod log_sink;
pub mod sim;
pub mod time;
