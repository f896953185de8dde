//! Orchestration layer for cartwheel
//!
//! This crate wires the store, the registry and the session runtime into a
//! game library and a runner for one display.

pub mod library;
pub mod runner;

pub use library::{Library, LibraryEntry, StateEntry};
pub use runner::{EmulatorRunner, MAIN_DISPLAY};
