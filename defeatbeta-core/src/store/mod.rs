//! Storage tiers: persistent freshness-validated disk cache and a bounded
//! in-memory map in front of it.

pub mod freshness;
pub mod memory;

pub use freshness::{CacheEntryMetadata, CachedEntry, FreshnessCache};
pub use memory::MemoryTier;
