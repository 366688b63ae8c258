//! intake-store: persistent seen-file metadata for intake pipelines
//!
//! A [`MetadataStore`] maps `(namespace, key)` to an opaque value. The
//! intake filter uses it to remember which remote files (and which
//! modification markers) were already accepted, across restarts.

pub mod duckdb_store;
pub mod memory;
pub mod store;

pub use duckdb_store::DuckDbStore;
pub use memory::MemoryStore;
pub use store::{MetadataStore, StoreError};
