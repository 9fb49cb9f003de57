//! Unified in-memory cache store with TTL expiry and filter-aware lookups.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::key::{QueryKey, Scope};
use super::matcher::{filter_rows, is_subset};
use super::traits::FilterableRow;
use crate::clock::{Clock, SystemClock};
use crate::filters::FilterSet;

/// Default lifetime of a cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// The request a filter-aware entry was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOrigin {
  pub data_type: String,
  pub scope: Scope,
  pub filters: FilterSet,
}

/// A stored value. Replaced wholesale on re-set, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
  pub data: Value,
  /// Epoch milliseconds at insertion
  pub timestamp: i64,
  pub ttl_ms: i64,
  /// Present only for entries stored with `set_intelligent`
  pub origin: Option<EntryOrigin>,
}

impl CacheItem {
  pub fn is_expired(&self, now_ms: i64) -> bool {
    now_ms - self.timestamp > self.ttl_ms
  }

  pub fn filters(&self) -> Option<&FilterSet> {
    self.origin.as_ref().map(|o| &o.filters)
  }
}

/// Diagnostic snapshot of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
  pub key: String,
  pub age_ms: i64,
  pub ttl_ms: i64,
  /// Serialized JSON size of the payload
  pub size_bytes: usize,
  pub expired: bool,
  pub filter_aware: bool,
}

/// Diagnostic snapshot of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub total_entries: usize,
  /// Entries past their TTL that have not been read since
  pub expired_entries: usize,
  pub entries: Vec<EntryStats>,
}

/// Keyed store of expiring values, shared by cheap clones.
///
/// Expiry is lazy: a stale entry is only removed when a read touches it.
pub struct UnifiedCache {
  entries: Arc<Mutex<HashMap<String, CacheItem>>>,
  default_ttl: Duration,
  clock: Arc<dyn Clock>,
}

impl UnifiedCache {
  /// Create an empty cache with the wall clock and default TTL.
  pub fn new() -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      default_ttl: DEFAULT_TTL,
      clock: Arc::new(SystemClock),
    }
  }

  /// Set the TTL used when a caller does not pass one.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  pub(crate) fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheItem>> {
    // A panic elsewhere cannot leave a half-written entry behind
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ttl_ms(&self, ttl: Option<Duration>) -> i64 {
    i64::try_from(ttl.unwrap_or(self.default_ttl).as_millis()).unwrap_or(i64::MAX)
  }

  fn insert(&self, key: String, data: Value, ttl: Option<Duration>, origin: Option<EntryOrigin>) {
    let item = CacheItem {
      data,
      timestamp: self.now_ms(),
      ttl_ms: self.ttl_ms(ttl),
      origin,
    };
    self.lock().insert(key, item);
  }

  /// Store a value under `key`.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Option<Duration>) {
    match serde_json::to_value(data) {
      Ok(value) => self.insert(key.to_string(), value, ttl, None),
      Err(e) => warn!(key, error = %e, "Skipping cache write, value is not serializable"),
    }
  }

  /// Get a fresh value. Expired entries are removed and reported as a miss.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get_fresh(key)?.data;
    decode(key, value)
  }

  fn get_fresh(&self, key: &str) -> Option<CacheItem> {
    let now = self.now_ms();
    let mut entries = self.lock();
    let item = entries.get(key)?;

    if item.is_expired(now) {
      debug!(key, "Cache entry expired");
      entries.remove(key);
      return None;
    }

    Some(item.clone())
  }

  /// True if a fresh entry exists under `key`.
  pub fn has(&self, key: &str) -> bool {
    self.get_fresh(key).is_some()
  }

  /// Remove one entry. Returns whether anything was removed.
  pub fn delete(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Remove every entry.
  pub fn clear(&self) {
    self.lock().clear();
  }

  /// Remove every entry whose key matches `pattern`. Returns the count.
  pub fn clear_pattern(&self, pattern: &regex::Regex) -> usize {
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|key, _| !pattern.is_match(key));
    let removed = before - entries.len();
    debug!(pattern = %pattern, removed, "Cleared cache entries by pattern");
    removed
  }

  /// Store the complete result of `key`'s request for later subset reuse.
  pub fn set_intelligent<R: Serialize>(&self, key: &QueryKey, rows: &[R], ttl: Option<Duration>) {
    let cache_key = key.cache_key();
    match serde_json::to_value(rows) {
      Ok(value) => {
        let origin = EntryOrigin {
          data_type: key.data_type.clone(),
          scope: key.scope.clone(),
          filters: key.filters.clone(),
        };
        debug!(query = %key.description(), rows = rows.len(), "Caching query result");
        self.insert(cache_key, value, ttl, Some(origin));
      }
      Err(e) => warn!(query = %key.description(), error = %e, "Skipping cache write, rows are not serializable"),
    }
  }

  /// Answer `key`'s request from the cache.
  ///
  /// An exact entry wins. Otherwise the most recently stored fresh entry
  /// of the same data type and scope whose filters entail the request is
  /// narrowed locally. The caller never receives rows outside its own
  /// filters.
  pub fn get_intelligent<R>(&self, key: &QueryKey) -> Option<Vec<R>>
  where
    R: FilterableRow + Clone + DeserializeOwned,
  {
    let cache_key = key.cache_key();
    let (source_key, item) = self.find_covering(&cache_key, key)?;
    let cached_filters = item.filters()?.clone();
    let rows: Vec<R> = decode(&source_key, item.data)?;

    if source_key == cache_key {
      debug!(query = %key.description(), "Exact cache hit");
    } else {
      debug!(query = %key.description(), source = %source_key, "Subset cache hit");
    }

    Some(filter_rows(&rows, &key.filters, &cached_filters))
  }

  fn find_covering(&self, cache_key: &str, key: &QueryKey) -> Option<(String, CacheItem)> {
    let now = self.now_ms();
    let mut entries = self.lock();

    let same_origin = |item: &CacheItem| {
      item
        .origin
        .as_ref()
        .is_some_and(|o| o.data_type == key.data_type && o.scope == key.scope)
    };

    let expired: Vec<String> = entries
      .iter()
      .filter(|(_, item)| same_origin(item) && item.is_expired(now))
      .map(|(k, _)| k.clone())
      .collect();
    for k in &expired {
      entries.remove(k);
    }

    if let Some(item) = entries.get(cache_key).filter(|item| item.origin.is_some()) {
      return Some((cache_key.to_string(), item.clone()));
    }

    entries
      .iter()
      .filter(|(_, item)| same_origin(item))
      .filter(|(_, item)| item.filters().is_some_and(|f| is_subset(&key.filters, f)))
      .max_by_key(|(_, item)| item.timestamp)
      .map(|(k, item)| (k.clone(), item.clone()))
  }

  /// Current keys, in no particular order.
  pub fn keys(&self) -> Vec<String> {
    self.lock().keys().cloned().collect()
  }

  /// Diagnostic snapshot. Does not expire anything.
  pub fn stats(&self) -> CacheStats {
    let now = self.now_ms();
    let entries = self.lock();

    let mut stats: Vec<EntryStats> = entries
      .iter()
      .map(|(key, item)| EntryStats {
        key: key.clone(),
        age_ms: now - item.timestamp,
        ttl_ms: item.ttl_ms,
        size_bytes: serde_json::to_vec(&item.data).map(|v| v.len()).unwrap_or(0),
        expired: item.is_expired(now),
        filter_aware: item.origin.is_some(),
      })
      .collect();
    stats.sort_by(|a, b| a.key.cmp(&b.key));

    CacheStats {
      total_entries: stats.len(),
      expired_entries: stats.iter().filter(|e| e.expired).count(),
      entries: stats,
    }
  }

  /// Copy out all entries, expired ones included.
  pub(crate) fn export(&self) -> Vec<(String, CacheItem)> {
    self
      .lock()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Insert entries as-is, keeping their original timestamps.
  pub(crate) fn import(&self, items: impl IntoIterator<Item = (String, CacheItem)>) {
    self.lock().extend(items);
  }
}

impl Default for UnifiedCache {
  fn default() -> Self {
    Self::new()
  }
}

impl Clone for UnifiedCache {
  fn clone(&self) -> Self {
    Self {
      entries: Arc::clone(&self.entries),
      default_ttl: self.default_ttl,
      clock: Arc::clone(&self.clock),
    }
  }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
  match serde_json::from_value(value) {
    Ok(data) => Some(data),
    Err(e) => {
      warn!(key, error = %e, "Cached value has an unexpected shape, treating as miss");
      None
    }
  }
}
