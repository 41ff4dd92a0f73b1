//! Key-value store abstraction for the redirected metadata files.
//!
//! The database's storage engine already maintains an encrypted, transactional
//! key-value store with named column families. The virtual-file layer persists
//! table schema files and database option files in that store instead of a
//! real filesystem. This crate defines the minimal contract the layer needs
//! and two backings: the engine itself (inside the enclave) and an in-memory
//! map (tests and host simulation).

use anyhow::Result;

#[cfg(feature = "enclave")]
mod engine;
mod memory;

#[cfg(feature = "enclave")]
pub use crate::engine::EngineStore;
pub use crate::memory::MemoryStore;

/// Contract between the virtual-file layer and its persistence backing.
///
/// Keys are unique within a column family. Values are opaque byte strings.
/// `put` and `delete` must be durable before they return; readers that follow
/// a completed write observe it.
pub trait Store: Send + Sync {
    /// Returns the value stored under `key`, or `None` if the key is absent.
    fn get(&self, column_family: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, overwriting any previous value.
    fn put(&self, column_family: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing an absent key is a no-op.
    fn delete(&self, column_family: &str, key: &str) -> Result<()>;

    /// Returns all keys starting with `prefix`, in no particular order.
    fn get_keys(&self, column_family: &str, prefix: &str) -> Result<Vec<String>>;
}
