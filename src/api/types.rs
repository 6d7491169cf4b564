use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Another user as embedded in messages, connections and requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
  pub id: i64,
  #[serde(default)]
  pub full_name: String,
  #[serde(default)]
  pub avatar: Option<String>,
}

/// Server ids are numeric; ids minted locally for optimistic sends are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
  Server(i64),
  Temp(String),
}

impl MessageId {
  pub fn is_temp(&self) -> bool {
    matches!(self, MessageId::Temp(_))
  }
}

impl fmt::Display for MessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MessageId::Server(id) => write!(f, "{}", id),
      MessageId::Temp(id) => f.write_str(id),
    }
  }
}

/// Client-only delivery marker for optimistic sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
  Sending,
  Error,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
  pub id: MessageId,
  #[serde(default)]
  pub content: String,
  pub sender: UserRef,
  pub recipient: UserRef,
  #[serde(alias = "sentAt", deserialize_with = "deserialize_timestamp")]
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub read: bool,
  /// Never sent, never cached
  #[serde(skip)]
  pub status: Option<DeliveryStatus>,
}

impl ChatMessage {
  /// The participant that isn't `me`.
  pub fn counterpart(&self, me: i64) -> &UserRef {
    if self.sender.id == me {
      &self.recipient
    } else {
      &self.sender
    }
  }

  /// Whether this message belongs to the conversation between `me` and `peer`.
  pub fn is_between(&self, me: i64, peer: i64) -> bool {
    (self.sender.id == me && self.recipient.id == peer)
      || (self.sender.id == peer && self.recipient.id == me)
  }
}

/// Latest message of a conversation, as listed in the inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
  pub id: MessageId,
  pub sender: UserRef,
  pub recipient: UserRef,
  #[serde(default)]
  pub content: String,
  #[serde(alias = "timestamp", deserialize_with = "deserialize_timestamp")]
  pub sent_at: DateTime<Utc>,
  #[serde(default)]
  pub read: bool,
}

impl InboxEntry {
  pub fn counterpart(&self, me: i64) -> &UserRef {
    if self.sender.id == me {
      &self.recipient
    } else {
      &self.sender
    }
  }
}

impl From<ChatMessage> for InboxEntry {
  fn from(msg: ChatMessage) -> Self {
    Self {
      id: msg.id,
      sender: msg.sender,
      recipient: msg.recipient,
      content: msg.content,
      sent_at: msg.timestamp,
      read: msg.read,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub id: i64,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub message: String,
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
  #[serde(default)]
  pub is_read: bool,
  #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
  pub created_at: Option<DateTime<Utc>>,
}

/// Job post summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPost {
  pub id: i64,
  pub title: String,
  pub company: Option<String>,
  pub location: Option<String>,
}

/// Pending incoming connection request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
  pub id: i64,
  pub requester: UserRef,
}

/// Profile as returned by `/api/users/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub id: i64,
  #[serde(default)]
  pub full_name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub role: Option<String>,
}

// ============================================================================
// Timestamps
// ============================================================================

/// Accept RFC 3339 as well as the zone-less `LocalDateTime` form the
/// backend emits, which is taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|dt| dt.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  parse_timestamp(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
}

fn deserialize_optional_timestamp<'de, D>(
  deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let s: Option<String> = Option::deserialize(deserializer)?;
  Ok(s.as_deref().and_then(parse_timestamp))
}
