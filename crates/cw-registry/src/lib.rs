//! System registry for cartwheel
//!
//! Resolves console tags and game file names to the descriptor of the
//! module that emulates them.

pub mod builtin;
pub mod registry;

pub use builtin::builtin_systems;
pub use registry::ModuleRegistry;
