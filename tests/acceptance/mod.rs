//! End-to-end tests for the HSI emulator.

mod common;
mod delivery_test;
mod rate_test;
mod run_cycle_test;
