//! Sharing a job post with existing conversation partners.

use color_eyre::Result;
use std::collections::HashMap;
use tracing::{info, warn};

use super::inbox::Inbox;
use super::sync::{append_history_cache, splice_inbox_cache, SendOutcome};
use crate::api::types::{JobPost, UserRef};
use crate::api::CachedSkillMatchClient;
use crate::cache::{CacheResult, CacheStorage};

/// Delivery state of a share, per recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareStatus {
  Sending,
  Sent,
  Error,
}

pub fn share_url(web_origin: &str, job_id: i64) -> String {
  format!("{}/jobs/{}", web_origin.trim_end_matches('/'), job_id)
}

/// DM text for sharing `job`.
pub fn message_for(job: &JobPost, url: &str) -> String {
  let company = job.company.as_deref().unwrap_or("Company");
  format!("Check out this job: {} at {}\n{}", job.title, company, url)
}

/// Share flow for one job post.
pub struct ShareJob<'a, S: CacheStorage> {
  client: &'a CachedSkillMatchClient<S>,
  me: i64,
  message: String,
  status: HashMap<i64, ShareStatus>,
}

impl<'a, S: CacheStorage> ShareJob<'a, S> {
  pub fn new(
    client: &'a CachedSkillMatchClient<S>,
    me: i64,
    job: &JobPost,
    web_origin: &str,
  ) -> Self {
    Self {
      client,
      me,
      message: message_for(job, &share_url(web_origin, job.id)),
      status: HashMap::new(),
    }
  }

  pub fn status(&self, recipient_id: i64) -> Option<ShareStatus> {
    self.status.get(&recipient_id).copied()
  }

  /// People the user has conversations with. Always asks the network and
  /// rewrites the cached inbox. A failure other than auth falls back to the
  /// cached inbox.
  pub async fn fetch_recipients(&self) -> Result<CacheResult<Vec<UserRef>>> {
    let me = self.me;
    let result = self.client.refresh_inbox().await?;
    Ok(result.map(|entries| Inbox::new(entries).recipients(me)))
  }

  /// Send the share to `recipient`. A recipient already sent to is skipped.
  pub async fn send_to(&mut self, recipient: &UserRef) -> SendOutcome {
    if self.status(recipient.id) == Some(ShareStatus::Sent) {
      return SendOutcome::Ignored;
    }
    self.status.insert(recipient.id, ShareStatus::Sending);

    match self.client.send_message(recipient.id, &self.message).await {
      Ok(stored) => {
        self.status.insert(recipient.id, ShareStatus::Sent);
        splice_inbox_cache(self.client, &stored, self.me);
        append_history_cache(self.client, &stored, self.me);
        info!("Shared job with user {}", recipient.id);
        SendOutcome::Sent(stored)
      }
      Err(e) => {
        warn!("Failed to share job with user {}: {}", recipient.id, e);
        self.status.insert(recipient.id, ShareStatus::Error);
        SendOutcome::Failed(e.to_string())
      }
    }
  }
}

/// Recipients whose name contains `term`, case-insensitively.
pub fn filter_recipients<'r>(recipients: &'r [UserRef], term: &str) -> Vec<&'r UserRef> {
  let term = term.to_lowercase();
  recipients
    .iter()
    .filter(|u| u.full_name.to_lowercase().contains(&term))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::cached_client::tests::client_for;
  use crate::api::fetch::tests::serve_once;
  use crate::api::types::{ChatMessage, InboxEntry, MessageId};
  use crate::api::ChatCacheKey;
  use crate::cache::CacheSource;
  use chrono::Utc;

  fn user(id: i64, name: &str) -> UserRef {
    UserRef {
      id,
      full_name: name.to_string(),
      avatar: None,
    }
  }

  fn job(company: Option<&str>) -> JobPost {
    JobPost {
      id: 42,
      title: "Rust Developer".to_string(),
      company: company.map(String::from),
      location: None,
    }
  }

  #[test]
  fn test_message_for_job() {
    let url = share_url("https://skillmatch.example/", 42);
    assert_eq!(url, "https://skillmatch.example/jobs/42");
    assert_eq!(
      message_for(&job(Some("Acme")), &url),
      "Check out this job: Rust Developer at Acme\nhttps://skillmatch.example/jobs/42"
    );
    assert!(message_for(&job(None), &url).contains(" at Company\n"));
  }

  #[test]
  fn test_filter_recipients() {
    let people = vec![user(2, "Bo Diddley"), user(3, "Cy Young")];
    let found = filter_recipients(&people, "bo");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 2);
  }

  fn entry(id: i64, from: UserRef, to: UserRef) -> InboxEntry {
    InboxEntry {
      id: MessageId::Server(id),
      sender: from,
      recipient: to,
      content: "hi".to_string(),
      sent_at: Utc::now(),
      read: true,
    }
  }

  const SERVER_INBOX: &str = r#"{"success":true,"data":[{"id":11,"sender":{"id":3,"fullName":"Cy"},"recipient":{"id":1,"fullName":"Me"},"content":"new","sentAt":"2024-03-02T10:00:00Z"},{"id":10,"sender":{"id":2,"fullName":"Bo"},"recipient":{"id":1,"fullName":"Me"},"content":"old","sentAt":"2024-03-01T10:00:00Z"}]}"#;

  #[tokio::test]
  async fn test_recipients_come_from_network_over_cache() {
    let client = client_for(&serve_once("200 OK", SERVER_INBOX).await);
    client.store(&ChatCacheKey::Inbox, &vec![entry(10, user(2, "Bo"), user(1, "Me"))]);

    let share = ShareJob::new(&client, 1, &job(None), "http://web");
    let result = share.fetch_recipients().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![user(3, "Cy"), user(2, "Bo")]);

    // The cached inbox now knows about the new partner too
    assert_eq!(client.cached_inbox().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_recipients_fall_back_to_cached_inbox() {
    let client = client_for(&serve_once("503 Service Unavailable", "down").await);
    client.store(&ChatCacheKey::Inbox, &vec![entry(10, user(2, "Bo"), user(1, "Me"))]);

    let share = ShareJob::new(&client, 1, &job(None), "http://web");
    let result = share.fetch_recipients().await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![user(2, "Bo")]);
  }

  const STORED: &str = r#"{"success":true,"data":{"id":77,"content":"shared","sender":{"id":1,"fullName":"Me"},"recipient":{"id":2,"fullName":"Bo"},"timestamp":"2024-03-01T10:00:00Z"}}"#;

  #[tokio::test]
  async fn test_send_to_updates_caches_and_status() {
    let client = client_for(&serve_once("200 OK", STORED).await);
    client.store(&ChatCacheKey::Inbox, &Vec::<InboxEntry>::new());
    client.store(&ChatCacheKey::History { peer_id: 2 }, &Vec::<ChatMessage>::new());

    let mut share = ShareJob::new(&client, 1, &job(Some("Acme")), "http://web");
    let bo = user(2, "Bo");
    assert!(matches!(share.send_to(&bo).await, SendOutcome::Sent(_)));
    assert_eq!(share.status(2), Some(ShareStatus::Sent));

    // Already sent, so no second request goes out
    assert_eq!(share.send_to(&bo).await, SendOutcome::Ignored);

    assert_eq!(client.cached_inbox().unwrap().len(), 1);
    assert_eq!(client.cached_history(2).unwrap()[0].id, MessageId::Server(77));
  }

  #[tokio::test]
  async fn test_send_to_failure_marks_error() {
    let client = client_for(&serve_once("500 Internal Server Error", "boom").await);
    let mut share = ShareJob::new(&client, 1, &job(None), "http://web");

    let outcome = share.send_to(&user(3, "Cy")).await;
    assert!(matches!(outcome, SendOutcome::Failed(_)));
    assert_eq!(share.status(3), Some(ShareStatus::Error));
  }
}
