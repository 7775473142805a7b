//! Test utilities for `axis-video-tb`
//!
//! Provides synthetic frame generation and stand-in designs for validating
//! the driver/monitor/scoreboard pipeline without an HDL simulator.

pub mod dut_models;
pub mod frame_generator;

pub use dut_models::*;
pub use frame_generator::*;

/// Route `log` output through the test harness; safe to call from every test.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
