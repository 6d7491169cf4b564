//! Per-user TTL cache for chat data and other disposable reads.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Stores typed values as `{data, timestamp, expiry}` JSON under a per-user namespace
//! - Deletes expired entries lazily on read and in bulk via `cleanup`
//! - Clears everything once per default-expiry window
//! - Supports cache-then-network reads with an offline fallback

mod layer;
mod storage;
mod traits;

pub use layer::ChatCache;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
