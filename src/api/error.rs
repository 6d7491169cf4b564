use reqwest::StatusCode;
use thiserror::Error;

/// Failures at the HTTP seam that callers may want to branch on.
///
/// Everything else travels as a plain `eyre::Report`; use
/// `report.downcast_ref::<ApiError>()` to recover one of these.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The stored token's `exp` is in the past; no request was sent.
  #[error("Token expired")]
  SessionExpired,

  #[error("Unauthorized")]
  Unauthorized,

  #[error("Request failed with status {status}: {body}")]
  Status { status: StatusCode, body: String },

  /// 2xx response whose envelope reported `success: false`.
  #[error("{}", message.as_deref().unwrap_or("Request was not successful"))]
  Envelope { message: Option<String> },

  #[error("Request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),
}

impl ApiError {
  /// Whether the session was dropped because of this error.
  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::SessionExpired | ApiError::Unauthorized)
  }
}
