//! One-to-one conversation state with optimistic sends and live merge.

use chrono::Utc;
use color_eyre::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::sync::{splice_inbox_cache, SendOutcome};
use crate::api::types::{ChatMessage, DeliveryStatus, MessageId, UserRef};
use crate::api::{CachedSkillMatchClient, ChatCacheKey};
use crate::cache::{CacheSource, CacheStorage};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Mint an id for a message the server hasn't stored yet.
///
/// The counter keeps ids distinct when several sends land in the same
/// millisecond.
pub fn temp_message_id() -> MessageId {
  let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
  MessageId::Temp(format!("temp-{}-{}", Utc::now().timestamp_millis(), seq))
}

/// Handle for a send started with `Conversation::begin_send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
  pub temp_id: MessageId,
  pub content: String,
}

/// Messages exchanged between `me` and `peer`, oldest first.
#[derive(Debug, Clone)]
pub struct Conversation {
  me: UserRef,
  peer: UserRef,
  messages: Vec<ChatMessage>,
}

impl Conversation {
  pub fn new(me: UserRef, peer: UserRef) -> Self {
    Self {
      me,
      peer,
      messages: Vec::new(),
    }
  }

  pub fn me(&self) -> &UserRef {
    &self.me
  }

  pub fn peer(&self) -> &UserRef {
    &self.peer
  }

  pub fn messages(&self) -> &[ChatMessage] {
    &self.messages
  }

  /// Install a fetched history. Sends still in flight or failed are kept
  /// at the end so their bubbles don't vanish.
  pub fn replace(&mut self, history: Vec<ChatMessage>) {
    let pending: Vec<ChatMessage> = self
      .messages
      .drain(..)
      .filter(|m| m.status.is_some())
      .collect();
    self.messages = history;
    self.messages.extend(pending);
  }

  /// Append an optimistic copy of `text`. Blank input sends nothing.
  pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
    if text.trim().is_empty() {
      return None;
    }

    let temp_id = temp_message_id();
    self.messages.push(ChatMessage {
      id: temp_id.clone(),
      content: text.to_string(),
      sender: self.me.clone(),
      recipient: self.peer.clone(),
      timestamp: Utc::now(),
      read: false,
      status: Some(DeliveryStatus::Sending),
    });

    Some(PendingSend {
      temp_id,
      content: text.to_string(),
    })
  }

  /// Swap the optimistic entry for the stored copy, in place.
  ///
  /// If the socket already delivered the stored copy, the optimistic entry
  /// is dropped instead so the message shows once.
  pub fn complete_send(&mut self, temp_id: &MessageId, mut confirmed: ChatMessage) {
    confirmed.status = None;
    let temp_pos = self.messages.iter().position(|m| &m.id == temp_id);
    let echoed = self.messages.iter().any(|m| m.id == confirmed.id);

    match (temp_pos, echoed) {
      (Some(pos), false) => self.messages[pos] = confirmed,
      (Some(pos), true) => {
        self.messages.remove(pos);
      }
      (None, false) => self.messages.push(confirmed),
      (None, true) => {}
    }
  }

  /// Mark the optimistic entry as failed. It stays in the list.
  pub fn fail_send(&mut self, temp_id: &MessageId) {
    if let Some(msg) = self.messages.iter_mut().find(|m| &m.id == temp_id) {
      msg.status = Some(DeliveryStatus::Error);
    }
  }

  /// Merge a message pushed by the server. Returns whether it was added.
  pub fn apply_incoming(&mut self, msg: ChatMessage) -> bool {
    if !msg.is_between(self.me.id, self.peer.id) {
      return false;
    }
    if self.messages.iter().any(|m| m.id == msg.id) {
      debug!("Ignoring duplicate delivery of message {}", msg.id);
      return false;
    }
    self.messages.push(msg);
    true
  }

  /// Messages acknowledged by the server, as they should be cached.
  pub fn confirmed(&self) -> Vec<ChatMessage> {
    self
      .messages
      .iter()
      .filter(|m| m.status.is_none())
      .cloned()
      .collect()
  }
}

/// A `Conversation` wired to the network and the cache.
pub struct ConversationSession<'a, S: CacheStorage> {
  client: &'a CachedSkillMatchClient<S>,
  conversation: Conversation,
}

impl<'a, S: CacheStorage> ConversationSession<'a, S> {
  /// Start from whatever history is cached for `peer`.
  pub fn open(client: &'a CachedSkillMatchClient<S>, me: UserRef, peer: UserRef) -> Self {
    let mut conversation = Conversation::new(me, peer);
    if let Some(cached) = client.cached_history(conversation.peer().id) {
      conversation.replace(cached);
    }
    Self {
      client,
      conversation,
    }
  }

  pub fn conversation(&self) -> &Conversation {
    &self.conversation
  }

  /// Load the authoritative history.
  pub async fn refresh(&mut self) -> Result<CacheSource> {
    let result = self
      .client
      .refresh_history(self.conversation.peer().id)
      .await?;
    self.conversation.replace(result.data);
    Ok(result.source)
  }

  /// Full optimistic send cycle for `text`.
  pub async fn send(&mut self, text: &str) -> SendOutcome {
    let Some(pending) = self.conversation.begin_send(text) else {
      return SendOutcome::Ignored;
    };

    match self
      .client
      .send_message(self.conversation.peer().id, &pending.content)
      .await
    {
      Ok(stored) => {
        self.conversation.complete_send(&pending.temp_id, stored.clone());
        self.sync_cache(&stored);
        SendOutcome::Sent(stored)
      }
      Err(e) => {
        warn!("Failed to send message to {}: {}", self.conversation.peer().id, e);
        self.conversation.fail_send(&pending.temp_id);
        SendOutcome::Failed(e.to_string())
      }
    }
  }

  /// Merge a socket delivery. Returns whether it changed the conversation.
  pub fn on_socket_message(&mut self, msg: ChatMessage) -> bool {
    let added = self.conversation.apply_incoming(msg.clone());
    if added {
      self.sync_cache(&msg);
    }
    added
  }

  fn sync_cache(&self, msg: &ChatMessage) {
    self.client.store(
      &ChatCacheKey::History {
        peer_id: self.conversation.peer().id,
      },
      &self.conversation.confirmed(),
    );
    splice_inbox_cache(self.client, msg, self.conversation.me().id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::cached_client::tests::client_for;
  use crate::api::fetch::tests::serve_once;

  fn user(id: i64) -> UserRef {
    UserRef {
      id,
      full_name: format!("User {}", id),
      avatar: None,
    }
  }

  fn server_msg(id: i64, from: i64, to: i64, content: &str) -> ChatMessage {
    ChatMessage {
      id: MessageId::Server(id),
      content: content.to_string(),
      sender: user(from),
      recipient: user(to),
      timestamp: Utc::now(),
      read: false,
      status: None,
    }
  }

  fn conversation() -> Conversation {
    let mut conv = Conversation::new(user(1), user(2));
    conv.replace(vec![server_msg(1, 2, 1, "hi"), server_msg(2, 1, 2, "hello")]);
    conv
  }

  #[test]
  fn test_blank_send_is_ignored() {
    let mut conv = conversation();
    assert!(conv.begin_send("   ").is_none());
    assert_eq!(conv.messages().len(), 2);
  }

  #[test]
  fn test_begin_send_appends_sending_entry() {
    let mut conv = conversation();
    let pending = conv.begin_send("new").unwrap();

    assert_eq!(conv.messages().len(), 3);
    let last = conv.messages().last().unwrap();
    assert_eq!(last.id, pending.temp_id);
    assert_eq!(last.status, Some(DeliveryStatus::Sending));
    assert!(last.id.is_temp());
  }

  #[test]
  fn test_complete_send_replaces_in_place() {
    let mut conv = conversation();
    let pending = conv.begin_send("first").unwrap();
    let _other = conv.begin_send("second").unwrap();

    conv.complete_send(&pending.temp_id, server_msg(10, 1, 2, "first"));

    assert_eq!(conv.messages().len(), 4);
    let replaced = &conv.messages()[2];
    assert_eq!(replaced.id, MessageId::Server(10));
    assert_eq!(replaced.status, None);
    assert_eq!(conv.messages()[3].status, Some(DeliveryStatus::Sending));
  }

  #[test]
  fn test_fail_send_leaves_single_error_entry() {
    let mut conv = conversation();
    let pending = conv.begin_send("oops").unwrap();
    conv.fail_send(&pending.temp_id);

    let failed: Vec<_> = conv
      .messages()
      .iter()
      .filter(|m| m.content == "oops")
      .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, Some(DeliveryStatus::Error));
    assert!(conv.confirmed().iter().all(|m| m.content != "oops"));
  }

  #[test]
  fn test_duplicate_delivery_is_ignored() {
    let mut conv = conversation();
    assert!(conv.apply_incoming(server_msg(3, 2, 1, "again")));
    assert!(!conv.apply_incoming(server_msg(3, 2, 1, "again")));
    assert!(!conv.apply_incoming(server_msg(1, 2, 1, "hi")));
    assert_eq!(conv.messages().len(), 3);
  }

  #[test]
  fn test_other_conversations_are_ignored() {
    let mut conv = conversation();
    assert!(!conv.apply_incoming(server_msg(4, 3, 1, "wrong chat")));
    assert_eq!(conv.messages().len(), 2);
  }

  #[test]
  fn test_echo_before_response_keeps_one_copy() {
    let mut conv = conversation();
    let pending = conv.begin_send("racy").unwrap();

    assert!(conv.apply_incoming(server_msg(11, 1, 2, "racy")));
    conv.complete_send(&pending.temp_id, server_msg(11, 1, 2, "racy"));

    let copies = conv.messages().iter().filter(|m| m.content == "racy").count();
    assert_eq!(copies, 1);
    assert_eq!(conv.messages().last().unwrap().id, MessageId::Server(11));
  }

  #[test]
  fn test_replace_keeps_pending_sends() {
    let mut conv = conversation();
    conv.begin_send("in flight").unwrap();
    conv.replace(vec![server_msg(1, 2, 1, "hi")]);

    assert_eq!(conv.messages().len(), 2);
    assert_eq!(conv.messages()[1].status, Some(DeliveryStatus::Sending));
  }

  #[test]
  fn test_temp_ids_are_unique() {
    let a = temp_message_id();
    let b = temp_message_id();
    assert_ne!(a, b);
  }

  const STORED: &str = r#"{"success":true,"data":{"id":99,"content":"yo","sender":{"id":1,"fullName":"Me"},"recipient":{"id":2,"fullName":"Bo"},"timestamp":"2024-03-01T10:00:00Z"}}"#;

  #[tokio::test]
  async fn test_session_send_writes_history_cache() {
    let client = client_for(&serve_once("200 OK", STORED).await);
    let mut session = ConversationSession::open(&client, user(1), user(2));

    let outcome = session.send("yo").await;
    assert!(matches!(outcome, SendOutcome::Sent(ref m) if m.id == MessageId::Server(99)));
    assert_eq!(session.conversation().messages().len(), 1);

    let cached = client.cached_history(2).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, MessageId::Server(99));
  }

  #[tokio::test]
  async fn test_session_send_failure_keeps_error_bubble() {
    let client = client_for(&serve_once("500 Internal Server Error", "boom").await);
    let mut session = ConversationSession::open(&client, user(1), user(2));

    let outcome = session.send("yo").await;
    assert!(matches!(outcome, SendOutcome::Failed(_)));
    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, Some(DeliveryStatus::Error));
    assert!(client.cached_history(2).is_none());
  }

  #[test]
  fn test_socket_message_updates_cached_inbox_and_history() {
    let client = client_for("http://127.0.0.1:9");
    client.store(&ChatCacheKey::Inbox, &Vec::<crate::api::types::InboxEntry>::new());
    let mut session = ConversationSession::open(&client, user(1), user(2));

    assert!(session.on_socket_message(server_msg(7, 2, 1, "ping")));
    assert!(!session.on_socket_message(server_msg(7, 2, 1, "ping")));

    let inbox = client.cached_inbox().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, "ping");

    let history = client.cached_history(2).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, MessageId::Server(7));
  }
}
