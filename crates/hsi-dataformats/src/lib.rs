//! Message types exchanged by the HSI emulator.
//!
//! This crate provides:
//! - [`HsiEvent`], the structured event sent to the trigger system
//! - [`TimeSync`], the clock-correlation sample published by the timing master
//! - [`HsiFrame`], the fixed 28-byte raw frame and its codec

pub mod event;
pub mod frame;

pub use event::*;
pub use frame::*;
