//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something that names a cache slot.
///
/// Keys are relative to the current user's namespace; the cache adds the
/// namespace prefix itself.
pub trait CacheKey {
  fn cache_key(&self) -> String;
}

impl CacheKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl CacheKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }
}

/// Stored form of a cached value. Times are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry<T> {
  pub data: T,
  pub timestamp: i64,
  pub expiry: i64,
}

impl<T> CachedEntry<T> {
  pub fn is_expired(&self, now: i64) -> bool {
    now - self.timestamp > self.expiry
  }

  pub fn cached_at(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Transform the data, keeping where it came from.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, young enough to skip the network
  CacheFresh,
  /// Network failed, serving an older unexpired copy
  Offline,
}

/// Outcome of a `ChatCache::cleanup` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub expired: usize,
  pub corrupt: usize,
  /// Entries dropped by the rolling global clear
  pub force_cleared: Option<usize>,
}

impl CleanupReport {
  pub fn removed(&self) -> usize {
    self.expired + self.corrupt + self.force_cleared.unwrap_or(0)
  }
}
