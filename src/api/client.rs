use color_eyre::Result;
use tracing::info;

use super::api_types::{
  ApiEnvelope, ApiJobPost, ApiLoginRequest, ApiLoginResponse, ApiPage, ApiSendMessageRequest,
};
use super::fetch::ApiFetch;
use super::types::{
  ChatMessage, ConnectionRequest, InboxEntry, JobPost, Notification, UserProfile, UserRef,
};
use crate::config::Config;
use crate::session::{Session, SessionHandle};

/// SkillMatch REST client
#[derive(Clone)]
pub struct SkillMatchClient {
  api: ApiFetch,
}

impl SkillMatchClient {
  pub fn new(config: &Config, session: SessionHandle) -> Result<Self> {
    Ok(Self {
      api: ApiFetch::new(&config.server.url, session)?,
    })
  }

  pub fn session(&self) -> &SessionHandle {
    self.api.session()
  }

  /// Exchange credentials for a token and store the resulting session
  pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
    let body = ApiLoginRequest { email, password };
    let response: ApiEnvelope<ApiLoginResponse> =
      self.api.post("/api/auth/login", Some(&body)).await?;
    let login = response.into_data()?;

    let session = Session {
      token: Some(login.token),
      user_id: Some(login.user_id),
      role: login.role,
      first_name: login
        .full_name
        .as_deref()
        .and_then(|n| n.split_whitespace().next())
        .map(String::from),
    };
    self.session().set(session.clone())?;
    info!("Logged in as user {}", login.user_id);
    Ok(session)
  }

  pub async fn get_user(&self, user_id: i64) -> Result<UserProfile> {
    let response: ApiEnvelope<UserProfile> =
      self.api.get(&format!("/api/users/{}", user_id)).await?;
    Ok(response.into_data()?)
  }

  // ==========================================================================
  // Messaging
  // ==========================================================================

  /// Latest message of every conversation, most recent first
  pub async fn get_inbox(&self) -> Result<Vec<InboxEntry>> {
    let response: ApiEnvelope<Vec<InboxEntry>> = self.api.get("/api/messages/inbox").await?;
    Ok(response.into_data()?)
  }

  /// Full conversation with another user, oldest first
  pub async fn get_history(&self, peer_id: i64) -> Result<Vec<ChatMessage>> {
    let response: ApiEnvelope<Vec<ChatMessage>> = self
      .api
      .get(&format!("/api/messages/history/{}", peer_id))
      .await?;
    Ok(response.into_data()?)
  }

  /// Send a message; returns the stored copy
  pub async fn send_message(&self, recipient_id: i64, content: &str) -> Result<ChatMessage> {
    let body = ApiSendMessageRequest {
      recipient_id,
      content,
    };
    let response: ApiEnvelope<ChatMessage> =
      self.api.post("/api/messages/send", Some(&body)).await?;
    Ok(response.into_data()?)
  }

  // ==========================================================================
  // Network
  // ==========================================================================

  pub async fn get_connections(&self) -> Result<Vec<UserRef>> {
    let response: ApiEnvelope<Vec<UserRef>> = self.api.get("/api/connections").await?;
    Ok(response.into_data()?)
  }

  pub async fn get_pending_requests(&self) -> Result<Vec<ConnectionRequest>> {
    let response: ApiEnvelope<Vec<ConnectionRequest>> =
      self.api.get("/api/connections/pending").await?;
    Ok(response.into_data()?)
  }

  pub async fn get_recommended_connections(&self) -> Result<Vec<UserRef>> {
    let response: ApiEnvelope<Vec<UserRef>> =
      self.api.get("/api/recommendations/connections").await?;
    Ok(response.into_data()?)
  }

  pub async fn request_connection(&self, target_id: i64) -> Result<()> {
    let response: ApiEnvelope<serde_json::Value> = self
      .api
      .post::<(), _>(&format!("/api/connections/request/{}", target_id), None)
      .await?;
    Ok(response.into_ack()?)
  }

  pub async fn accept_connection(&self, request_id: i64) -> Result<()> {
    let response: ApiEnvelope<serde_json::Value> = self
      .api
      .post::<(), _>(&format!("/api/connections/accept/{}", request_id), None)
      .await?;
    Ok(response.into_ack()?)
  }

  // ==========================================================================
  // Notifications
  // ==========================================================================

  pub async fn get_notifications(&self, user_id: i64) -> Result<Vec<Notification>> {
    let response: ApiEnvelope<Vec<Notification>> = self
      .api
      .get(&format!("/api/notifications/user/{}", user_id))
      .await?;
    Ok(response.into_data()?)
  }

  pub async fn mark_notification_read(&self, id: i64) -> Result<()> {
    self.ack_put(&format!("/api/notifications/{}/read", id)).await
  }

  pub async fn mark_all_notifications_read(&self, user_id: i64) -> Result<()> {
    self
      .ack_put(&format!("/api/notifications/user/{}/read-all", user_id))
      .await
  }

  pub async fn delete_notification(&self, id: i64) -> Result<()> {
    let response: Option<ApiEnvelope<serde_json::Value>> = self
      .api
      .delete(&format!("/api/notifications/{}", id))
      .await?;
    match response {
      Some(envelope) => Ok(envelope.into_ack()?),
      None => Ok(()),
    }
  }

  async fn ack_put(&self, endpoint: &str) -> Result<()> {
    let response: Option<ApiEnvelope<serde_json::Value>> = self.api.put(endpoint).await?;
    match response {
      Some(envelope) => Ok(envelope.into_ack()?),
      None => Ok(()),
    }
  }

  // ==========================================================================
  // Jobs
  // ==========================================================================

  pub async fn get_recent_jobs(&self, page: u32, size: u32) -> Result<Vec<JobPost>> {
    let response: ApiPage<ApiJobPost> = self
      .api
      .get(&format!("/post?page={}&size={}", page, size))
      .await?;
    Ok(response.into_items().into_iter().map(JobPost::from).collect())
  }

  pub async fn get_job(&self, job_id: i64) -> Result<JobPost> {
    let job: ApiJobPost = self.api.get(&format!("/post/{}", job_id)).await?;
    Ok(job.into())
  }

  pub async fn get_recommended_jobs(&self) -> Result<Vec<JobPost>> {
    let response: ApiEnvelope<Vec<ApiJobPost>> =
      self.api.get("/api/recommendations/jobs").await?;
    Ok(
      response
        .into_data()?
        .into_iter()
        .map(JobPost::from)
        .collect(),
    )
  }
}
