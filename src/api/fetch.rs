//! Thin HTTP wrapper shared by every endpoint call.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::error::ApiError;
use crate::session::{is_token_expired, SessionHandle};

/// JSON-over-HTTP with bearer auth.
///
/// One attempt per call: no retry, no backoff, no timeout. A 401 or an
/// expired token clears the session, which flips its `AuthState` to
/// `LoginRequired`.
#[derive(Clone)]
pub struct ApiFetch {
  http: reqwest::Client,
  base_url: String,
  session: SessionHandle,
}

impl ApiFetch {
  pub fn new(base_url: &str, session: SessionHandle) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid server URL {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("skillmatch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      session,
    })
  }

  pub fn session(&self) -> &SessionHandle {
    &self.session
  }

  /// Absolute URLs pass through; anything else is appended to the base URL.
  pub fn resolve(&self, endpoint: &str) -> Result<Url> {
    let raw = if endpoint.starts_with("http") {
      endpoint.to_string()
    } else if endpoint.starts_with('/') {
      format!("{}{}", self.base_url, endpoint)
    } else {
      format!("{}/{}", self.base_url, endpoint)
    };
    Url::parse(&raw).map_err(|e| eyre!("Invalid endpoint {}: {}", endpoint, e))
  }

  /// Current bearer token, refusing to use one that has already expired.
  fn bearer(&self) -> Result<Option<String>, ApiError> {
    let Some(token) = self.session.token() else {
      return Ok(None);
    };
    if is_token_expired(&token, Utc::now()) {
      warn!("Stored token has expired; login required");
      self.session.clear();
      return Err(ApiError::SessionExpired);
    }
    Ok(Some(token))
  }

  /// Send one request. `Ok(None)` means the server returned no content.
  pub async fn request<B, T>(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&B>,
  ) -> Result<Option<T>>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let url = self.resolve(endpoint)?;
    let token = self.bearer()?;

    debug!("{} {}", method, url);
    let mut builder = self
      .http
      .request(method.clone(), url.clone())
      .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
      builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(body) = body {
      builder = builder.body(serde_json::to_vec(body).map_err(ApiError::from)?);
    }

    let response = builder.send().await.map_err(ApiError::from)?;
    let status = response.status();

    if status == StatusCode::NO_CONTENT {
      return Ok(None);
    }

    if status == StatusCode::UNAUTHORIZED {
      warn!("{} {} returned 401; clearing session", method, url);
      self.session.clear();
      return Err(ApiError::Unauthorized.into());
    }

    let bytes = response.bytes().await.map_err(ApiError::from)?;

    if !status.is_success() {
      return Err(
        ApiError::Status {
          status,
          body: String::from_utf8_lossy(&bytes).into_owned(),
        }
        .into(),
      );
    }

    if bytes.is_empty() {
      return Ok(None);
    }

    let data = serde_json::from_slice(&bytes).map_err(ApiError::from)?;
    Ok(Some(data))
  }

  pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
    self
      .request::<(), T>(Method::GET, endpoint, None)
      .await?
      .ok_or_else(|| eyre!("Empty response from {}", endpoint))
  }

  pub async fn post<B, T>(&self, endpoint: &str, body: Option<&B>) -> Result<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    self
      .request(Method::POST, endpoint, body)
      .await?
      .ok_or_else(|| eyre!("Empty response from {}", endpoint))
  }

  pub async fn put<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
    self.request::<(), T>(Method::PUT, endpoint, None).await
  }

  pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
    self.request::<(), T>(Method::DELETE, endpoint, None).await
  }
}
