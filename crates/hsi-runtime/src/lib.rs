#![doc = "Event generation engine for the HSI emulator."]

pub mod dispatcher;
pub mod frame_processor;
pub mod generator;
pub mod scheduler;
pub mod signal_map;
pub mod timestamp;

pub use dispatcher::*;
pub use frame_processor::*;
pub use generator::*;
pub use scheduler::*;
pub use signal_map::*;
pub use timestamp::*;
