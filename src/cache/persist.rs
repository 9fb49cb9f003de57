//! Opt-in snapshot persistence for the unified cache.
//!
//! Nothing is written unless the caller explicitly saves. Snapshots are
//! versioned and size-bounded; any row that cannot be trusted on load is
//! dropped, and an unreadable database is treated as an empty cache.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{CacheItem, EntryOrigin, UnifiedCache};

/// Bumped whenever the row layout or payload encoding changes.
pub const SNAPSHOT_VERSION: i64 = 1;

/// Default upper bound for the total payload bytes written per snapshot.
pub const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

/// Schema for snapshot tables.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    origin TEXT,
    stored_at INTEGER NOT NULL,
    ttl_ms INTEGER NOT NULL,
    checksum TEXT NOT NULL
);
"#;

/// SQLite-backed cache snapshot.
pub struct SqliteSnapshot {
  conn: Mutex<Connection>,
  max_bytes: usize,
}

impl SqliteSnapshot {
  /// Open (or create) a snapshot file at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    match Self::open_file(path) {
      Ok(snapshot) => Ok(snapshot),
      Err(e) if path.exists() => {
        let aside = Self::aside_path(path);
        warn!(
          path = %path.display(),
          moved_to = %aside.display(),
          error = %e,
          "Cache snapshot unreadable, starting a new one"
        );
        std::fs::rename(path, &aside)
          .map_err(|e| eyre!("Failed to move unreadable snapshot {}: {}", path.display(), e))?;
        Self::open_file(path)
      }
      Err(e) => Err(e),
    }
  }

  /// Where an unreadable file at `path` is kept.
  fn aside_path(path: &Path) -> PathBuf {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    PathBuf::from(aside)
  }

  fn open_file(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache snapshot at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Snapshot that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory snapshot: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let snapshot = Self {
      conn: Mutex::new(conn),
      max_bytes: DEFAULT_MAX_BYTES,
    };
    snapshot.run_migrations()?;
    Ok(snapshot)
  }

  /// Set the byte budget for saved payloads.
  pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
    self.max_bytes = max_bytes;
    self
  }

  /// Default snapshot location under the user data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("procache").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create tables, discarding snapshots written with another version.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read snapshot version: {}", e))?;

    if version != 0 && version != SNAPSHOT_VERSION {
      warn!(
        found = version,
        expected = SNAPSHOT_VERSION,
        "Discarding cache snapshot with unknown version"
      );
      conn
        .execute_batch("DROP TABLE IF EXISTS cache_entries;")
        .map_err(|e| eyre!("Failed to drop old snapshot: {}", e))?;
    }

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;
    conn
      .execute_batch(&format!("PRAGMA user_version = {};", SNAPSHOT_VERSION))
      .map_err(|e| eyre!("Failed to set snapshot version: {}", e))?;

    Ok(())
  }

  /// Replace the snapshot with the cache's fresh entries.
  ///
  /// Entries are written smallest first until the byte budget is spent;
  /// the rest are skipped. Returns the number of entries written.
  pub fn save(&self, cache: &UnifiedCache) -> Result<usize> {
    let now = cache.now_ms();
    let mut rows: Vec<(String, Vec<u8>, Option<String>, CacheItem)> = Vec::new();

    for (key, item) in cache.export() {
      if item.is_expired(now) {
        continue;
      }
      let payload = serde_json::to_vec(&item.data)
        .map_err(|e| eyre!("Failed to serialize cache entry {}: {}", key, e))?;
      let origin = item
        .origin
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| eyre!("Failed to serialize cache origin {}: {}", key, e))?;
      rows.push((key, payload, origin, item));
    }
    rows.sort_by_key(|(_, payload, _, _)| payload.len());

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear snapshot: {}", e))?;

    let mut budget = self.max_bytes;
    let mut written = 0;
    for (key, payload, origin, item) in rows {
      if payload.len() > budget {
        debug!(key = %key, size = payload.len(), "Snapshot budget exhausted, skipping entry");
        continue;
      }
      budget -= payload.len();

      let checksum = checksum(&payload, origin.as_deref());
      tx.execute(
        "INSERT INTO cache_entries (cache_key, payload, origin, stored_at, ttl_ms, checksum)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![key, payload, origin, item.timestamp, item.ttl_ms, checksum],
      )
      .map_err(|e| eyre!("Failed to store snapshot entry: {}", e))?;
      written += 1;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit snapshot: {}", e))?;

    info!(written, "Saved cache snapshot");
    Ok(written)
  }

  /// Restore fresh, intact entries into `cache`.
  ///
  /// Never fails: unreadable state is logged and restores nothing.
  pub fn load(&self, cache: &UnifiedCache) -> usize {
    match self.read_entries(cache.now_ms()) {
      Ok(items) => {
        let restored = items.len();
        cache.import(items);
        info!(restored, "Restored cache snapshot");
        restored
      }
      Err(e) => {
        warn!(error = %e, "Cache snapshot unreadable, starting empty");
        0
      }
    }
  }

  fn read_entries(&self, now: i64) -> Result<Vec<(String, CacheItem)>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT cache_key, payload, origin, stored_at, ttl_ms, checksum FROM cache_entries")
      .map_err(|e| eyre!("Failed to prepare snapshot query: {}", e))?;

    let raw: Vec<(String, Vec<u8>, Option<String>, i64, i64, String)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query snapshot: {}", e))?
      .filter_map(|r| match r {
        Ok(row) => Some(row),
        Err(e) => {
          warn!(error = %e, "Dropping unreadable snapshot row");
          None
        }
      })
      .collect();

    let mut items = Vec::with_capacity(raw.len());
    for (key, payload, origin, stored_at, ttl_ms, stored_checksum) in raw {
      if checksum(&payload, origin.as_deref()) != stored_checksum {
        warn!(key = %key, "Dropping corrupt snapshot entry");
        continue;
      }

      let data = match serde_json::from_slice(&payload) {
        Ok(data) => data,
        Err(e) => {
          warn!(key = %key, error = %e, "Dropping unparseable snapshot entry");
          continue;
        }
      };
      let origin: Option<EntryOrigin> = match origin.map(|o| serde_json::from_str(&o)).transpose() {
        Ok(origin) => origin,
        Err(e) => {
          warn!(key = %key, error = %e, "Dropping snapshot entry with unparseable filters");
          continue;
        }
      };

      let item = CacheItem {
        data,
        timestamp: stored_at,
        ttl_ms,
        origin,
      };
      if item.is_expired(now) {
        continue;
      }
      items.push((key, item));
    }

    Ok(items)
  }

  #[cfg(test)]
  fn corrupt(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE cache_entries SET payload = ? WHERE cache_key = ?",
        params![b"{\"tampered\":true}".to_vec(), key],
      )
      .map_err(|e| eyre!("Failed to corrupt entry: {}", e))?;
    Ok(())
  }
}

/// SHA256 over payload and origin, hex encoded.
fn checksum(payload: &[u8], origin: Option<&str>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hasher.update(origin.unwrap_or("").as_bytes());
  hex::encode(hasher.finalize())
}
