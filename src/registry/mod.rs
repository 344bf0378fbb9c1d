//! Device state
//!
//! The in-memory registry is the single owner of device records. The store
//! is the durable collaborator behind it.

mod manager;
mod store;

pub use manager::DeviceRegistry;
pub use store::{generate_mesh_key, MemoryStore, StoreError, SystemStore};
