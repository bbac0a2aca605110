//! # LakeSync Store
//!
//! Storage layer for the LakeSync gateway: object stores, per-engine
//! delta adapters, the columnar flush codec, equality-delete files, and
//! the Iceberg-style catalogue.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │              lakesync-store                │
//! ├──────────────┬──────────────┬──────────────┤
//! │ ObjectStore  │ Database     │  Catalog     │
//! │ (memory,     │ Adapter      │  (namespaces,│
//! │  local fs)   │ (LWW state)  │   snapshots) │
//! ├──────────────┴──────────────┴──────────────┤
//! │    Flush codec (Parquet/Snappy + JSON)     │
//! │    Equality-delete files                   │
//! └────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod catalog;
pub mod eq_delete;
pub mod flush_codec;
pub mod memory;
pub mod object;

// Re-exports for convenience
pub use adapter::{materialize_row, DatabaseAdapter};
pub use catalog::{iceberg_schema_for, Catalog, DataFile, IcebergSchema, MemoryCatalog, Snapshot};
pub use eq_delete::{read_equality_deletes, write_equality_deletes, EqualityDelete};
pub use flush_codec::{read_parquet, write_parquet, FlushManifest, BOOL_COLUMNS_KEY};
pub use memory::MemoryAdapter;
pub use object::{LocalFsObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore};
