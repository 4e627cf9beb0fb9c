//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host with no kiln
//! hardware required.

mod learning_tests;
mod mock_hw;
mod runner_tests;
mod sensor_loop_tests;
mod service_tests;
mod watchdog_tests;
