//! Core logic shared by every cartwheel crate
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure.

pub mod asset;
pub mod config;
pub mod error;
pub mod logging;
pub mod system;

pub use asset::{AssetClass, AssetKind};
pub use config::Config;
pub use error::{
    CartwheelError, RegistryError, Result, SessionError, SnapshotError, StoreError,
};
pub use system::{ScreenGeometry, SystemDescriptor, SystemId};
