//! Cached SkillMatch client that wraps SkillMatchClient with a per-user cache.

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::warn;

use crate::cache::{CacheResult, CacheStorage, ChatCache};

use super::cache::ChatCacheKey;
use super::client::SkillMatchClient;
use super::error::ApiError;
use super::types::{ChatMessage, InboxEntry, JobPost, Notification};

/// SkillMatch client with cache-then-network reads.
///
/// Chat reads follow the render pattern of the web client: `cached_*`
/// returns whatever is on disk for an immediate view, `refresh_*` always
/// goes to the network and rewrites the cache. Slower-moving feeds go
/// through `ChatCache::fetch_cached` and its stale time.
pub struct CachedSkillMatchClient<S: CacheStorage> {
  inner: SkillMatchClient,
  cache: ChatCache<S>,
}

impl<S: CacheStorage> CachedSkillMatchClient<S> {
  pub fn new(inner: SkillMatchClient, cache: ChatCache<S>) -> Self {
    Self { inner, cache }
  }

  pub fn inner(&self) -> &SkillMatchClient {
    &self.inner
  }

  pub fn cache(&self) -> &ChatCache<S> {
    &self.cache
  }

  /// Read a cache slot, treating storage errors as a miss.
  pub fn peek<T: DeserializeOwned>(&self, key: &ChatCacheKey) -> Option<T> {
    match self.cache.get(key) {
      Ok(data) => data,
      Err(e) => {
        warn!("Cache read for {:?} failed: {}", key, e);
        None
      }
    }
  }

  /// Write a cache slot, logging instead of failing.
  pub fn store<T: Serialize + ?Sized>(&self, key: &ChatCacheKey, data: &T) {
    if let Err(e) = self.cache.set(key, data) {
      warn!("Cache write for {:?} failed: {}", key, e);
    }
  }

  async fn refresh<T, F, Fut>(&self, key: ChatCacheKey, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    match fetcher().await {
      Ok(data) => {
        self.store(&key, &data);
        Ok(CacheResult::from_network(data))
      }
      Err(e) => {
        // A dropped session must not be papered over with cached data
        if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_auth) {
          return Err(e);
        }
        match self.cache.get_entry::<_, T>(&key) {
          Ok(Some(entry)) => {
            warn!("Refresh of {:?} failed, serving cached copy: {}", key, e);
            let cached_at = entry.cached_at();
            Ok(CacheResult::offline(entry.data, cached_at))
          }
          _ => Err(e),
        }
      }
    }
  }

  // ==========================================================================
  // Inbox
  // ==========================================================================

  pub fn cached_inbox(&self) -> Option<Vec<InboxEntry>> {
    self.peek(&ChatCacheKey::Inbox)
  }

  pub async fn refresh_inbox(&self) -> Result<CacheResult<Vec<InboxEntry>>> {
    self
      .refresh(ChatCacheKey::Inbox, || self.inner.get_inbox())
      .await
  }

  // ==========================================================================
  // Conversation history
  // ==========================================================================

  pub fn cached_history(&self, peer_id: i64) -> Option<Vec<ChatMessage>> {
    self.peek(&ChatCacheKey::History { peer_id })
  }

  pub async fn refresh_history(&self, peer_id: i64) -> Result<CacheResult<Vec<ChatMessage>>> {
    self
      .refresh(ChatCacheKey::History { peer_id }, || {
        self.inner.get_history(peer_id)
      })
      .await
  }

  /// Send a message (not cached - write operation).
  pub async fn send_message(&self, recipient_id: i64, content: &str) -> Result<ChatMessage> {
    self.inner.send_message(recipient_id, content).await
  }

  // ==========================================================================
  // Feeds
  // ==========================================================================

  pub async fn get_notifications(&self, user_id: i64) -> Result<CacheResult<Vec<Notification>>> {
    self
      .cache
      .fetch_cached(&ChatCacheKey::Notifications, || {
        self.inner.get_notifications(user_id)
      })
      .await
  }

  pub async fn get_recommended_jobs(&self) -> Result<CacheResult<Vec<JobPost>>> {
    self
      .cache
      .fetch_cached(&ChatCacheKey::RecommendedJobs, || {
        self.inner.get_recommended_jobs()
      })
      .await
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::api::fetch::tests::serve_once;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::config::{Config, ServerConfig};
  use crate::session::{Session, SessionHandle};

  /// Client signed in as user 1 with an empty in-memory cache.
  pub(crate) fn client_for(base: &str) -> CachedSkillMatchClient<SqliteStorage> {
    let config = Config {
      server: ServerConfig {
        url: base.to_string(),
        ws_url: None,
        web_origin: None,
      },
      ..Config::default()
    };
    let session = SessionHandle::in_memory(Session {
      token: Some("opaque".to_string()),
      user_id: Some(1),
      ..Session::default()
    });
    let inner = SkillMatchClient::new(&config, session).unwrap();
    let cache = ChatCache::new(SqliteStorage::open_in_memory().unwrap(), Some(1));
    CachedSkillMatchClient::new(inner, cache)
  }

  const INBOX: &str = r#"{"success":true,"data":[{"id":10,"sender":{"id":2,"fullName":"Bo"},"recipient":{"id":1,"fullName":"Me"},"content":"hey","sentAt":"2024-03-01T10:00:00"}]}"#;

  #[tokio::test]
  async fn test_refresh_inbox_writes_cache() {
    let client = client_for(&serve_once("200 OK", INBOX).await);
    assert!(client.cached_inbox().is_none());

    let result = client.refresh_inbox().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.len(), 1);

    let cached = client.cached_inbox().unwrap();
    assert_eq!(cached[0].content, "hey");
  }

  #[tokio::test]
  async fn test_refresh_falls_back_to_cache_on_server_error() {
    let client = client_for(&serve_once("503 Service Unavailable", "down").await);
    client.store(&ChatCacheKey::History { peer_id: 2 }, &Vec::<ChatMessage>::new());

    let result = client.refresh_history(2).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_refresh_does_not_mask_unauthorized() {
    let client = client_for(&serve_once("401 Unauthorized", "").await);
    client.store(&ChatCacheKey::Inbox, &Vec::<InboxEntry>::new());

    let err = client.refresh_inbox().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)));
  }
}
