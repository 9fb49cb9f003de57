//! Filter-aware query result caching.
//!
//! This module provides an in-process cache that:
//! - Stores expiring values under opaque string keys
//! - Remembers the filters each query result was fetched with
//! - Serves narrower requests by re-filtering a broader cached result locally
//! - Optionally snapshots itself to SQLite (disabled unless asked for)

mod key;
mod matcher;
mod persist;
mod store;
mod traits;

pub use key::{keys, QueryKey, Scope};
pub use matcher::{filter_rows, is_subset};
pub use persist::{SqliteSnapshot, DEFAULT_MAX_BYTES, SNAPSHOT_VERSION};
pub use store::{CacheItem, CacheStats, EntryOrigin, EntryStats, UnifiedCache, DEFAULT_TTL};
pub use traits::{CacheResult, CacheSource, FilterableRow};
