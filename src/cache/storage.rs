//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Trait for cache storage backends.
///
/// A flat string key/value store. Values are opaque to the backend.
pub trait CacheStorage: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  /// All keys starting with `prefix`, in key order.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Lets the backend be picked at runtime (`Box<dyn CacheStorage>`).
impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    (**self).get_item(key)
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    (**self).set_item(key, value)
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    (**self).remove_item(key)
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    (**self).keys_with_prefix(prefix)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_item(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove_item(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Private database that disappears with the handle.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache key {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write cache key {}: {}", key, e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache key {}: {}", key, e))?;

    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // substr instead of LIKE: prefixes contain '_'
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;

    let keys = stmt
      .query_map(params![prefix], |row| row.get(0))
      .map_err(|e| eyre!("Failed to scan cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_get_remove() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.get_item("a").unwrap(), None);

    storage.set_item("a", "1").unwrap();
    storage.set_item("a", "2").unwrap();
    assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("2"));

    storage.remove_item("a").unwrap();
    assert_eq!(storage.get_item("a").unwrap(), None);
  }

  #[test]
  fn test_prefix_scan_treats_underscore_literally() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.set_item("c_1_inbox", "x").unwrap();
    storage.set_item("c_1_history_2", "x").unwrap();
    storage.set_item("cX1_inbox", "x").unwrap();
    storage.set_item("c_12_inbox", "x").unwrap();

    let keys = storage.keys_with_prefix("c_1_").unwrap();
    assert_eq!(keys, vec!["c_1_history_2".to_string(), "c_1_inbox".to_string()]);
  }

  #[test]
  fn test_prefix_scan_reports_unreadable_rows() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.set_item("c_1_inbox", "x").unwrap();
    {
      // Text that isn't valid UTF-8 can't be read back as a String
      let conn = storage.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO kv_store (key, value) VALUES (CAST(X'635F315FFF' AS TEXT), 'x')",
          [],
        )
        .unwrap();
    }

    assert!(storage.keys_with_prefix("c_1_").is_err());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.set_item("a", "1").unwrap();
    assert_eq!(storage.get_item("a").unwrap(), None);
    assert!(storage.keys_with_prefix("").unwrap().is_empty());
  }
}
