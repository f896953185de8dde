//! Durable key/value storage for cartwheel
//!
//! Game images, firmware images and saved states are kept here as opaque
//! blobs keyed by plain file names, one namespace per store.

pub mod asset;
pub mod fs;
pub mod memory;
pub mod store;

pub use asset::Asset;
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use store::{validate_key, BlobStore};
