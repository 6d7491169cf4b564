//! Signed-in user state.
//!
//! A single `Session` value carries the bearer token and identity that the
//! rest of the client needs. It is shared through a cloneable
//! `SessionHandle` and persisted as JSON between runs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
  Candidate,
  Employer,
  Admin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub token: Option<String>,
  pub user_id: Option<i64>,
  pub role: Option<Role>,
  pub first_name: Option<String>,
}

impl Session {
  pub fn is_authenticated(&self) -> bool {
    self.token.is_some()
  }
}

/// Whether the client may keep using its credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
  LoggedIn,
  /// Token was rejected or expired; the user has to sign in again.
  LoginRequired,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
  exp: Option<i64>,
}

/// Read `exp` from a JWT payload without verifying the signature.
///
/// Returns `None` for tokens that are not a decodable JWT or carry no `exp`.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
  let payload = token.split('.').nth(1)?;
  let bytes = URL_SAFE_NO_PAD
    .decode(payload.trim_end_matches('='))
    .ok()?;
  let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
  Utc.timestamp_opt(claims.exp?, 0).single()
}

/// Undecodable tokens are left for the server to judge.
pub fn is_token_expired(token: &str, now: DateTime<Utc>) -> bool {
  token_expiry(token).is_some_and(|exp| exp < now)
}

/// Shared, persisted session with an auth-state broadcast.
#[derive(Clone)]
pub struct SessionHandle {
  inner: Arc<RwLock<Session>>,
  path: Option<PathBuf>,
  auth_tx: Arc<watch::Sender<AuthState>>,
}

impl SessionHandle {
  /// Load the session stored at `path`, or start signed out.
  pub fn load(path: &Path) -> Result<Self> {
    let session = if path.exists() {
      let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
      match serde_json::from_str(&contents) {
        Ok(session) => session,
        Err(e) => {
          warn!("Discarding unreadable session file {}: {}", path.display(), e);
          Session::default()
        }
      }
    } else {
      Session::default()
    };

    Ok(Self::build(session, Some(path.to_path_buf())))
  }

  /// A session that is never written to disk.
  pub fn in_memory(session: Session) -> Self {
    Self::build(session, None)
  }

  fn build(session: Session, path: Option<PathBuf>) -> Self {
    let state = if session.is_authenticated() {
      AuthState::LoggedIn
    } else {
      AuthState::LoginRequired
    };
    let (auth_tx, _) = watch::channel(state);
    Self {
      inner: Arc::new(RwLock::new(session)),
      path,
      auth_tx: Arc::new(auth_tx),
    }
  }

  pub fn snapshot(&self) -> Session {
    self
      .inner
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  pub fn token(&self) -> Option<String> {
    self.snapshot().token
  }

  pub fn user_id(&self) -> Option<i64> {
    self.snapshot().user_id
  }

  #[cfg(test)]
  pub fn auth_state(&self) -> AuthState {
    *self.auth_tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<AuthState> {
    self.auth_tx.subscribe()
  }

  /// Replace the session after a successful login.
  pub fn set(&self, session: Session) -> Result<()> {
    self.persist(&session)?;
    *self
      .inner
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = session;
    self.auth_tx.send_replace(AuthState::LoggedIn);
    info!("Session updated");
    Ok(())
  }

  /// Drop credentials and signal that a login is required.
  pub fn clear(&self) {
    if let Ok(mut guard) = self.inner.write() {
      *guard = Session::default();
    }
    if let Some(path) = &self.path {
      if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
          warn!("Failed to remove session file {}: {}", path.display(), e);
        }
      }
    }
    self.auth_tx.send_replace(AuthState::LoginRequired);
    debug!("Session cleared");
  }

  fn persist(&self, session: &Session) -> Result<()> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }
    let data = serde_json::to_string_pretty(session)
      .map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(path, data)
      .map_err(|e| eyre!("Failed to write session file {}: {}", path.display(), e))?;
    Ok(())
  }
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
  let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
  let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"7","exp":{}}}"#, exp));
  format!("{}.{}.signature", header, payload)
}
