//! Inbox list reconciliation and display helpers.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::api::types::{InboxEntry, UserRef};

/// Longest preview shown for a conversation's last message
pub const MAX_PREVIEW: usize = 80;

/// Latest message per conversation, most recent first
#[derive(Debug, Clone, Default)]
pub struct Inbox {
  entries: Vec<InboxEntry>,
}

impl Inbox {
  pub fn new(entries: Vec<InboxEntry>) -> Self {
    Self { entries }
  }

  pub fn entries(&self) -> &[InboxEntry] {
    &self.entries
  }

  /// Move the conversation `entry` belongs to onto the front, replacing its
  /// previous last message. New conversations are inserted at the front.
  pub fn apply_message(&mut self, entry: InboxEntry, me: i64) {
    let peer = entry.counterpart(me).id;
    if let Some(pos) = self
      .entries
      .iter()
      .position(|e| e.counterpart(me).id == peer)
    {
      self.entries.remove(pos);
    }
    self.entries.insert(0, entry);
  }

  /// Conversations whose other participant's name contains `term`
  /// (case-insensitive).
  pub fn filter(&self, term: &str, me: i64) -> Vec<&InboxEntry> {
    let term = term.to_lowercase();
    self
      .entries
      .iter()
      .filter(|e| e.counterpart(me).full_name.to_lowercase().contains(&term))
      .collect()
  }

  /// Distinct conversation partners in inbox order.
  pub fn recipients(&self, me: i64) -> Vec<UserRef> {
    let mut seen = HashSet::new();
    self
      .entries
      .iter()
      .map(|e| e.counterpart(me))
      .filter(|u| seen.insert(u.id))
      .cloned()
      .collect()
  }

  pub fn unread_count(&self, me: i64) -> usize {
    self.entries.iter().filter(|e| is_unread(e, me)).count()
  }
}

/// Only messages addressed to `me` can be unread.
pub fn is_unread(entry: &InboxEntry, me: i64) -> bool {
  !entry.read && entry.recipient.id == me
}

/// Clip `content` to `MAX_PREVIEW` characters, ending in `...` when cut.
pub fn preview(content: &str) -> String {
  if content.chars().count() > MAX_PREVIEW {
    let mut clipped: String = content.chars().take(MAX_PREVIEW - 3).collect();
    clipped.push_str("...");
    clipped
  } else {
    content.to_string()
  }
}

/// Compact age: `now`, `5m`, `3h`, `2d`.
pub fn time_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let secs = (now - at).num_seconds();
  if secs < 60 {
    "now".to_string()
  } else if secs < 3600 {
    format!("{}m", secs / 60)
  } else if secs < 86_400 {
    format!("{}h", secs / 3600)
  } else {
    format!("{}d", secs / 86_400)
  }
}
