//! Serde types matching SkillMatch request and response bodies.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::types::JobPost;
use crate::session::Role;

// ============================================================================
// Response envelope
// ============================================================================

/// `{ success, data, message }` wrapper used by most endpoints
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  #[serde(default)]
  pub success: bool,
  pub data: Option<T>,
  pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
  /// Payload of a successful response.
  pub fn into_data(self) -> Result<T, ApiError> {
    match (self.success, self.data) {
      (true, Some(data)) => Ok(data),
      (true, None) => Err(ApiError::Envelope {
        message: Some("Response carried no data".to_string()),
      }),
      (false, _) => Err(ApiError::Envelope {
        message: self.message,
      }),
    }
  }

  /// For endpoints whose payload is irrelevant.
  pub fn into_ack(self) -> Result<(), ApiError> {
    if self.success {
      Ok(())
    } else {
      Err(ApiError::Envelope {
        message: self.message,
      })
    }
  }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiLoginRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLoginResponse {
  pub token: String,
  #[serde(alias = "id")]
  pub user_id: i64,
  pub role: Option<Role>,
  #[serde(default)]
  pub full_name: Option<String>,
}

// ============================================================================
// Messaging
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSendMessageRequest<'a> {
  pub recipient_id: i64,
  pub content: &'a str,
}

// ============================================================================
// Jobs
// ============================================================================

/// `/post` answers either with a Spring page or a bare array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiPage<T> {
  Paged { content: Vec<T> },
  Bare(Vec<T>),
}

impl<T> ApiPage<T> {
  pub fn into_items(self) -> Vec<T> {
    match self {
      ApiPage::Paged { content } => content,
      ApiPage::Bare(items) => items,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiEmployer {
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiJobPost {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  pub company: Option<String>,
  pub employer: Option<ApiEmployer>,
  pub location: Option<String>,
}

impl From<ApiJobPost> for JobPost {
  fn from(job: ApiJobPost) -> Self {
    let company = job
      .company
      .filter(|c| !c.is_empty())
      .or_else(|| job.employer.and_then(|e| e.name));
    Self {
      id: job.id,
      title: job.title,
      company,
      location: job.location,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_failure_carries_message() {
    let env: ApiEnvelope<i32> =
      serde_json::from_str(r#"{"success": false, "message": "Already connected"}"#).unwrap();
    let err = env.into_data().unwrap_err();
    assert_eq!(err.to_string(), "Already connected");
  }

  #[test]
  fn test_envelope_success() {
    let env: ApiEnvelope<Vec<i32>> =
      serde_json::from_str(r#"{"success": true, "data": [1, 2]}"#).unwrap();
    assert_eq!(env.into_data().unwrap(), vec![1, 2]);
  }

  #[test]
  fn test_page_accepts_both_shapes() {
    let paged: ApiPage<i32> = serde_json::from_str(r#"{"content": [1], "totalPages": 3}"#).unwrap();
    assert_eq!(paged.into_items(), vec![1]);
    let bare: ApiPage<i32> = serde_json::from_str("[1, 2]").unwrap();
    assert_eq!(bare.into_items(), vec![1, 2]);
  }

  #[test]
  fn test_job_company_falls_back_to_employer() {
    let job: ApiJobPost = serde_json::from_str(
      r#"{"id": 3, "title": "Rust Dev", "employer": {"name": "Acme"}}"#,
    )
    .unwrap();
    let job = JobPost::from(job);
    assert_eq!(job.company.as_deref(), Some("Acme"));
  }
}
