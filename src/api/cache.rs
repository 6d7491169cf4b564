//! Cache slots used by the SkillMatch client.

use crate::cache::CacheKey;

/// Named cache entries, relative to the signed-in user's namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCacheKey {
  /// Inbox list (latest message per conversation)
  Inbox,
  /// Full history with another user
  History { peer_id: i64 },
  /// Notifications for the signed-in user
  Notifications,
  /// Recommended jobs feed
  RecommendedJobs,
}

impl CacheKey for ChatCacheKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Inbox => "inbox_list".to_string(),
      Self::History { peer_id } => format!("history_{}", peer_id),
      Self::Notifications => "notifications".to_string(),
      Self::RecommendedJobs => "recommended_jobs".to_string(),
    }
  }
}
