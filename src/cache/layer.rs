//! Per-user TTL cache that orchestrates caching logic with network fetching.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::traits::{CacheKey, CacheResult, CachedEntry, CleanupReport};
use crate::config::{DEFAULT_EXPIRY_HOURS, DEFAULT_STALE_MINUTES};

/// Storage key prefix shared by every user's entries.
pub const CACHE_NAME: &str = "skillmatch-chat-cache-v1";

/// Outside the `{CACHE_NAME}_` namespace so sweeps never touch it.
const GLOBAL_CLEAR_KEY: &str = "skillmatch-chat-cache-v1:last_global_clear";

const GUEST: &str = "guest";

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
  Arc::new(|| Utc::now().timestamp_millis())
}

/// Typed TTL cache, namespaced by user id.
///
/// Entries live under `{CACHE_NAME}_{user}_{key}`. Writes are
/// last-writer-wins; nothing coordinates concurrent processes.
pub struct ChatCache<S: CacheStorage> {
  storage: Arc<S>,
  user: String,
  /// Lifetime given to entries written with `set`
  default_expiry: Duration,
  /// How long before cached data is re-fetched by `fetch_cached`
  stale_time: Duration,
  clock: Clock,
}

impl<S: CacheStorage> ChatCache<S> {
  /// Create a cache bound to `user_id` (or the guest namespace).
  pub fn new(storage: S, user_id: Option<i64>) -> Self {
    Self {
      storage: Arc::new(storage),
      user: namespace_for(user_id),
      default_expiry: Duration::hours(DEFAULT_EXPIRY_HOURS),
      stale_time: Duration::minutes(DEFAULT_STALE_MINUTES),
      clock: system_clock(),
    }
  }

  pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
    self.default_expiry = expiry;
    self
  }

  /// How long `fetch_cached` trusts a cached copy without asking the network.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  #[cfg(test)]
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  /// A view over the same storage bound to another user.
  pub fn for_user(&self, user_id: Option<i64>) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      user: namespace_for(user_id),
      default_expiry: self.default_expiry,
      stale_time: self.stale_time,
      clock: Arc::clone(&self.clock),
    }
  }

  fn now(&self) -> i64 {
    (self.clock)()
  }

  fn prefix(&self) -> String {
    format!("{}_{}_", CACHE_NAME, self.user)
  }

  fn full_key<K: CacheKey + ?Sized>(&self, key: &K) -> String {
    format!("{}{}", self.prefix(), key.cache_key())
  }

  /// Store `data` with the default expiry.
  pub fn set<K, T>(&self, key: &K, data: &T) -> Result<()>
  where
    K: CacheKey + ?Sized,
    T: Serialize + ?Sized,
  {
    self.set_with_expiry(key, data, self.default_expiry)
  }

  pub fn set_with_expiry<K, T>(&self, key: &K, data: &T, expiry: Duration) -> Result<()>
  where
    K: CacheKey + ?Sized,
    T: Serialize + ?Sized,
  {
    let entry = CachedEntry {
      data,
      timestamp: self.now(),
      expiry: expiry.num_milliseconds(),
    };
    let value =
      serde_json::to_string(&entry).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;
    self.storage.set_item(&self.full_key(key), &value)
  }

  /// Cached data if present and unexpired. Expired or unreadable entries
  /// are deleted on the way out.
  pub fn get<K, T>(&self, key: &K) -> Result<Option<T>>
  where
    K: CacheKey + ?Sized,
    T: DeserializeOwned,
  {
    Ok(self.get_entry(key)?.map(|entry| entry.data))
  }

  pub fn get_entry<K, T>(&self, key: &K) -> Result<Option<CachedEntry<T>>>
  where
    K: CacheKey + ?Sized,
    T: DeserializeOwned,
  {
    let full_key = self.full_key(key);
    let Some(raw) = self.storage.get_item(&full_key)? else {
      return Ok(None);
    };

    let entry: CachedEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("Dropping unreadable cache entry {}: {}", full_key, e);
        self.storage.remove_item(&full_key)?;
        return Ok(None);
      }
    };

    if entry.is_expired(self.now()) {
      debug!("Cache entry {} expired", full_key);
      self.storage.remove_item(&full_key)?;
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Remove one entry for the current user.
  pub fn clear<K: CacheKey + ?Sized>(&self, key: &K) -> Result<()> {
    self.storage.remove_item(&self.full_key(key))
  }

  /// Remove every entry for the current user. Returns how many were removed.
  pub fn clear_all(&self) -> Result<usize> {
    let keys = self.storage.keys_with_prefix(&self.prefix())?;
    for key in &keys {
      self.storage.remove_item(key)?;
    }
    Ok(keys.len())
  }

  /// Sweep every user's entries, dropping expired and unreadable ones.
  ///
  /// Independently of per-entry expiry, everything is cleared once per
  /// default-expiry window, tracked by a marker written on first run.
  pub fn cleanup(&self) -> Result<CleanupReport> {
    let now = self.now();
    let all_prefix = format!("{}_", CACHE_NAME);
    let mut report = CleanupReport::default();

    let last_clear = self
      .storage
      .get_item(GLOBAL_CLEAR_KEY)?
      .and_then(|v| v.parse::<i64>().ok());

    match last_clear {
      None => {
        self.storage.set_item(GLOBAL_CLEAR_KEY, &now.to_string())?;
      }
      Some(last) if now - last > self.default_expiry.num_milliseconds() => {
        let keys = self.storage.keys_with_prefix(&all_prefix)?;
        for key in &keys {
          self.storage.remove_item(key)?;
        }
        self.storage.set_item(GLOBAL_CLEAR_KEY, &now.to_string())?;
        info!("Rolling cache clear removed {} entries", keys.len());
        report.force_cleared = Some(keys.len());
        return Ok(report);
      }
      Some(_) => {}
    }

    for key in self.storage.keys_with_prefix(&all_prefix)? {
      let Some(raw) = self.storage.get_item(&key)? else {
        continue;
      };
      match serde_json::from_str::<CachedEntry<IgnoredAny>>(&raw) {
        Ok(entry) if entry.is_expired(now) => {
          self.storage.remove_item(&key)?;
          report.expired += 1;
        }
        Ok(_) => {}
        Err(_) => {
          self.storage.remove_item(&key)?;
          report.corrupt += 1;
        }
      }
    }

    debug!(
      "Cache cleanup removed {} expired and {} corrupt entries",
      report.expired, report.corrupt
    );
    Ok(report)
  }

  /// Cache-then-network read.
  ///
  /// 1. Cached copy younger than the stale time is returned as is
  /// 2. Otherwise fetch from network and store the result
  /// 3. On network failure, fall back to any unexpired copy (offline mode)
  pub async fn fetch_cached<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>>
  where
    K: CacheKey + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let cached = match self.get_entry::<K, T>(key) {
      Ok(cached) => cached,
      Err(e) => {
        warn!("Cache read failed, going to network: {}", e);
        None
      }
    };

    let cached = match cached {
      Some(entry) if self.now() - entry.timestamp <= self.stale_time.num_milliseconds() => {
        let cached_at = entry.cached_at();
        return Ok(CacheResult::from_cache(entry.data, cached_at));
      }
      other => other,
    };

    match fetcher().await {
      Ok(data) => {
        if let Err(e) = self.set(key, &data) {
          warn!("Cache write failed: {}", e);
        }
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match cached {
        Some(entry) => {
          warn!("Network failed, serving cached copy: {}", e);
          let cached_at = entry.cached_at();
          Ok(CacheResult::offline(entry.data, cached_at))
        }
        None => Err(e),
      },
    }
  }
}

impl<S: CacheStorage> Clone for ChatCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      user: self.user.clone(),
      default_expiry: self.default_expiry,
      stale_time: self.stale_time,
      clock: Arc::clone(&self.clock),
    }
  }
}

fn namespace_for(user_id: Option<i64>) -> String {
  user_id.map_or_else(|| GUEST.to_string(), |id| id.to_string())
}
