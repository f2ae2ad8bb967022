//! Versioned response partitions.
//!
//! - [`partition`]: PartitionKind and current-generation PartitionNames
//! - [`key`]: CacheKey parsing and sprite variant URL derivation
//! - [`store`]: PartitionStore trait and the in-memory store
//! - [`disk_store`]: Disk-backed store that survives restarts
//! - [`compressor`]: zstd body compression for disk entries

pub mod compressor;
pub mod disk_store;
pub mod key;
pub mod partition;
pub mod store;
