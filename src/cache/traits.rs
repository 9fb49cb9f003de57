//! Core traits and types for the caching system.

use chrono::NaiveDate;

/// Rows that the subset matcher can re-filter locally.
///
/// Each accessor returns `None` when the row has no value for that
/// dimension; such rows never match a constraint on it.
pub trait FilterableRow {
  /// Calendar day the row belongs to (e.g. invoice date)
  fn row_date(&self) -> Option<NaiveDate>;

  fn location_id(&self) -> Option<&str>;

  fn supplier_id(&self) -> Option<&str>;

  fn category_id(&self) -> Option<&str>;
}

/// Result from a cache-aware load, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where loaded data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the backend
  Network,
  /// Served from the cache, exactly or by narrowing a broader entry
  Cache,
}
