//! Writing delivered messages back into the chat caches.

use crate::api::types::{ChatMessage, InboxEntry};
use crate::api::{CachedSkillMatchClient, ChatCacheKey};
use crate::cache::CacheStorage;

use super::inbox::Inbox;

/// Result of trying to send a message
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
  /// Blank input; nothing was sent
  Ignored,
  Sent(ChatMessage),
  Failed(String),
}

/// Move the conversation `msg` belongs to onto the front of the cached
/// inbox. Does nothing when no inbox is cached or `msg` is not stored on the
/// server yet.
pub fn splice_inbox_cache<S: CacheStorage>(
  client: &CachedSkillMatchClient<S>,
  msg: &ChatMessage,
  me: i64,
) {
  if msg.id.is_temp() {
    return;
  }
  let Some(entries) = client.cached_inbox() else {
    return;
  };
  let mut inbox = Inbox::new(entries);
  inbox.apply_message(InboxEntry::from(msg.clone()), me);
  client.store(&ChatCacheKey::Inbox, inbox.entries());
}

/// Append `msg` to the cached history with its other participant, if that
/// history is cached and doesn't already hold it.
pub fn append_history_cache<S: CacheStorage>(
  client: &CachedSkillMatchClient<S>,
  msg: &ChatMessage,
  me: i64,
) {
  if msg.id.is_temp() {
    return;
  }
  let peer_id = msg.counterpart(me).id;
  let Some(mut history) = client.cached_history(peer_id) else {
    return;
  };
  if history.iter().any(|m| m.id == msg.id) {
    return;
  }
  history.push(msg.clone());
  client.store(&ChatCacheKey::History { peer_id }, &history);
}
