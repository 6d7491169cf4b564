use chrono::{DateTime, Local, Utc};
use color_eyre::{eyre::eyre, Report, Result};
use std::collections::HashSet;
use std::io::Write;
use tracing::{info, warn};

use crate::api::types::{ChatMessage, DeliveryStatus, MessageId, UserRef};
use crate::api::{ApiError, CachedSkillMatchClient, ChatCacheKey, SkillMatchClient};
use crate::cache::{CacheSource, CacheStorage, ChatCache};
use crate::commands::{CacheCommand, Command};
use crate::config::Config;
use crate::event::{ChatEvent, EventHandler};
use crate::messaging::inbox::{is_unread, preview, time_ago};
use crate::messaging::share::filter_recipients;
use crate::messaging::sync::splice_inbox_cache;
use crate::messaging::{ConversationSession, Inbox, SendOutcome, ShareJob};
use crate::session::{token_expiry, SessionHandle};
use crate::stomp::LiveChannel;

/// Cache backend picked at startup
pub type Storage = Box<dyn CacheStorage>;

/// Typing this in a chat leaves it
const QUIT: &str = "/quit";

const LOGIN_HINT: &str = "Run `skillmatch login --email <email>` to sign in.";

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// SkillMatch client with the signed-in user's cache
  client: CachedSkillMatchClient<Storage>,
}

impl App {
  pub fn new(config: Config, session: SessionHandle, storage: Storage) -> Result<Self> {
    let user_id = session.user_id();
    let inner = SkillMatchClient::new(&config, session)?;
    let cache = ChatCache::new(storage, user_id)
      .with_default_expiry(config.default_expiry())
      .with_stale_time(config.stale_time());

    match cache.cleanup() {
      Ok(report) if report.removed() > 0 => info!("Startup cache cleanup: {:?}", report),
      Ok(_) => {}
      Err(e) => warn!("Startup cache cleanup failed: {}", e),
    }

    Ok(Self {
      config,
      client: CachedSkillMatchClient::new(inner, cache),
    })
  }

  fn session(&self) -> &SessionHandle {
    self.client.inner().session()
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    if !command.is_anonymous() && !self.session().snapshot().is_authenticated() {
      return Err(eyre!("Not logged in. {}", LOGIN_HINT));
    }

    self.dispatch(command).await.map_err(with_login_hint)
  }

  async fn dispatch(&self, command: Command) -> Result<()> {
    match command {
      Command::Login { email, password } => self.login(&email, password).await,
      Command::Logout => {
        self.session().clear();
        println!("Logged out");
        Ok(())
      }
      Command::Whoami => {
        self.whoami();
        Ok(())
      }
      Command::Inbox { search } => self.inbox(search.as_deref()).await,
      Command::Chat { user } => self.chat(user).await,
      Command::Send { user, text } => self.send(user, &text).await,
      Command::Share {
        job_id,
        user,
        search,
      } => self.share(job_id, user, search.as_deref()).await,
      Command::Connections {
        pending,
        recommended,
      } => self.connections(pending, recommended).await,
      Command::Connect { user } => {
        self.client.inner().request_connection(user).await?;
        println!("Connection request sent to user {}", user);
        Ok(())
      }
      Command::Accept { request } => {
        self.client.inner().accept_connection(request).await?;
        println!("Accepted connection request {}", request);
        Ok(())
      }
      Command::Notifications {
        read_all,
        read,
        delete,
      } => self.notifications(read_all, read, delete).await,
      Command::Jobs { recommended } => self.jobs(recommended).await,
      Command::Cache { action } => self.cache(action),
    }
  }

  // ==========================================================================
  // Account
  // ==========================================================================

  async fn login(&self, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
      Some(p) => p,
      None => read_password()?,
    };
    let session = self.client.inner().login(email, &password).await?;

    // The cache handle was opened for the previous user
    let cache = self.client.cache().for_user(session.user_id);
    if let Err(e) = cache.cleanup() {
      warn!("Cache cleanup after login failed: {}", e);
    }

    println!(
      "Logged in as {}",
      session.first_name.as_deref().unwrap_or(email)
    );
    Ok(())
  }

  fn whoami(&self) {
    let session = self.session().snapshot();
    let Some(user_id) = session.user_id.filter(|_| session.is_authenticated()) else {
      println!("Not logged in");
      return;
    };

    println!(
      "{} (user {})",
      session.first_name.as_deref().unwrap_or("Unknown"),
      user_id
    );
    if let Some(role) = session.role {
      println!("Role: {:?}", role);
    }
    if let Some(exp) = session.token.as_deref().and_then(token_expiry) {
      println!("Token expires: {}", exp.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    }
  }

  fn me(&self) -> Result<UserRef> {
    let session = self.session().snapshot();
    let id = session
      .user_id
      .ok_or_else(|| eyre!("Session has no user id. Please log in again."))?;
    Ok(UserRef {
      id,
      full_name: session.first_name.unwrap_or_else(|| "You".to_string()),
      avatar: None,
    })
  }

  /// Resolve a user id to a display name, falling back to a placeholder
  /// when the profile can't be loaded.
  async fn lookup_user(&self, user_id: i64) -> Result<UserRef> {
    match self.client.inner().get_user(user_id).await {
      Ok(profile) => Ok(UserRef {
        id: profile.id,
        full_name: profile.full_name,
        avatar: None,
      }),
      Err(e) if is_auth_error(&e) => Err(e),
      Err(e) => {
        warn!("Failed to load user {}: {}", user_id, e);
        Ok(UserRef {
          id: user_id,
          full_name: format!("User {}", user_id),
          avatar: None,
        })
      }
    }
  }

  // ==========================================================================
  // Messaging
  // ==========================================================================

  async fn inbox(&self, search: Option<&str>) -> Result<()> {
    let me = self.me()?.id;
    let result = self.client.refresh_inbox().await?;
    note_source(result.source, result.cached_at);

    let inbox = Inbox::new(result.data);
    let entries = match search {
      Some(term) => inbox.filter(term, me),
      None => inbox.entries().iter().collect(),
    };

    if entries.is_empty() {
      println!("No conversations");
      return Ok(());
    }

    let now = Utc::now();
    for entry in entries {
      let other = entry.counterpart(me);
      let marker = if is_unread(entry, me) { '*' } else { ' ' };
      println!(
        "{} {:>6}  {:<24} {:>4}  {}",
        marker,
        other.id,
        other.full_name,
        time_ago(entry.sent_at, now),
        preview(&entry.content)
      );
    }
    println!("{} unread", inbox.unread_count(me));
    Ok(())
  }

  async fn chat(&self, peer_id: i64) -> Result<()> {
    let me = self.me()?;
    let peer = self.lookup_user(peer_id).await?;
    let mut conversation = ConversationSession::open(&self.client, me.clone(), peer.clone());
    let mut shown = HashSet::new();

    // Cached copy first, then whatever the network adds
    print_new(conversation.conversation().messages(), &mut shown, me.id);
    let ws_url = self.config.ws_url();
    let (refreshed, connected) = tokio::join!(
      conversation.refresh(),
      LiveChannel::connect(&ws_url, self.session())
    );
    match refreshed {
      Ok(source) => note_source(source, None),
      Err(e) if is_auth_error(&e) => return Err(e),
      Err(e) => eprintln!("Could not load history: {}", e),
    }
    print_new(conversation.conversation().messages(), &mut shown, me.id);

    let channel = match connected {
      Ok(channel) => Some(channel),
      Err(e) if is_auth_error(&e) => return Err(e),
      Err(e) => {
        warn!("Live channel unavailable: {}", e);
        eprintln!("Live updates unavailable: {}", e);
        None
      }
    };

    println!(
      "Chatting with {}. Type a message and press enter, {} to leave.",
      peer.full_name, QUIT
    );

    let mut events = EventHandler::new(channel, self.session().subscribe());
    while let Some(event) = events.next().await {
      match event {
        ChatEvent::Input(line) if line.trim() == QUIT => break,
        ChatEvent::Input(line) => match conversation.send(&line).await {
          SendOutcome::Sent(msg) => {
            print_new(std::slice::from_ref(&msg), &mut shown, me.id);
          }
          SendOutcome::Failed(reason) => {
            eprintln!("Not delivered ({}): {}", reason, line.trim());
          }
          SendOutcome::Ignored => {}
        },
        ChatEvent::Incoming(msg) => {
          if conversation.on_socket_message(msg.clone()) {
            print_new(std::slice::from_ref(&msg), &mut shown, me.id);
          } else if !msg.is_between(me.id, peer.id) {
            splice_inbox_cache(&self.client, &msg, me.id);
            println!("(new message from {})", msg.sender.full_name);
          }
        }
        ChatEvent::ChannelClosed => eprintln!("Live updates stopped"),
        ChatEvent::LoggedOut => {
          events.shutdown().await;
          return Err(ApiError::SessionExpired.into());
        }
        ChatEvent::InputClosed => break,
      }
    }

    events.shutdown().await;
    Ok(())
  }

  async fn send(&self, peer_id: i64, text: &str) -> Result<()> {
    let me = self.me()?;
    let peer = self.lookup_user(peer_id).await?;
    let mut conversation = ConversationSession::open(&self.client, me, peer);

    match conversation.send(text).await {
      SendOutcome::Sent(msg) => {
        println!("Sent to {}", msg.recipient.full_name);
        Ok(())
      }
      SendOutcome::Failed(reason) => Err(eyre!("Message not delivered: {}", reason)),
      SendOutcome::Ignored => Err(eyre!("Nothing to send")),
    }
  }

  async fn share(&self, job_id: i64, user: Option<i64>, search: Option<&str>) -> Result<()> {
    let me = self.me()?.id;
    let job = self.client.inner().get_job(job_id).await?;
    let mut share = ShareJob::new(&self.client, me, &job, self.config.web_origin());

    let result = share.fetch_recipients().await?;
    note_source(result.source, result.cached_at);
    let recipients = result.data;

    let Some(user) = user else {
      let listed = filter_recipients(&recipients, search.unwrap_or(""));
      if listed.is_empty() {
        println!("No recipients");
      }
      for r in listed {
        println!("{:>6}  {}", r.id, r.full_name);
      }
      return Ok(());
    };

    let recipient = match recipients.into_iter().find(|r| r.id == user) {
      Some(r) => r,
      None => self.lookup_user(user).await?,
    };

    match share.send_to(&recipient).await {
      SendOutcome::Sent(_) => {
        println!("Shared \"{}\" with {}", job.title, recipient.full_name);
        Ok(())
      }
      SendOutcome::Failed(reason) => Err(eyre!("Failed to share job: {}", reason)),
      SendOutcome::Ignored => Ok(()),
    }
  }

  // ==========================================================================
  // Network, notifications, jobs
  // ==========================================================================

  async fn connections(&self, pending: bool, recommended: bool) -> Result<()> {
    if recommended {
      let people = self.client.inner().get_recommended_connections().await?;
      if people.is_empty() {
        println!("No suggestions right now");
      }
      for user in people {
        println!("{:>6}  {}", user.id, user.full_name);
      }
    } else if pending {
      let requests = self.client.inner().get_pending_requests().await?;
      if requests.is_empty() {
        println!("No pending requests");
      }
      for request in requests {
        println!(
          "{:>6}  {} (user {})",
          request.id, request.requester.full_name, request.requester.id
        );
      }
    } else {
      let connections = self.client.inner().get_connections().await?;
      if connections.is_empty() {
        println!("No connections yet");
      }
      for user in connections {
        println!("{:>6}  {}", user.id, user.full_name);
      }
    }
    Ok(())
  }

  async fn notifications(
    &self,
    read_all: bool,
    read: Option<i64>,
    delete: Option<i64>,
  ) -> Result<()> {
    let me = self.me()?.id;
    let api = self.client.inner();
    if read_all {
      api.mark_all_notifications_read(me).await?;
    }
    if let Some(id) = read {
      api.mark_notification_read(id).await?;
    }
    if let Some(id) = delete {
      api.delete_notification(id).await?;
    }
    if read_all || read.is_some() || delete.is_some() {
      // The cached list no longer matches the server
      self.client.cache().clear(&ChatCacheKey::Notifications)?;
    }

    let result = self.client.get_notifications(me).await?;
    note_source(result.source, result.cached_at);

    if result.data.is_empty() {
      println!("No notifications");
    }
    let now = Utc::now();
    for n in result.data {
      let marker = if n.is_read { ' ' } else { '*' };
      let age = n.created_at.map(|at| time_ago(at, now)).unwrap_or_default();
      match n.title.as_deref() {
        Some(title) => println!("{} {:>4}  {}: {}", marker, age, title, n.message),
        None => println!("{} {:>4}  {}", marker, age, n.message),
      }
    }
    Ok(())
  }

  async fn jobs(&self, recommended: bool) -> Result<()> {
    let jobs = if recommended {
      let result = self.client.get_recommended_jobs().await?;
      note_source(result.source, result.cached_at);
      result.data
    } else {
      self.client.inner().get_recent_jobs(0, 20).await?
    };

    if jobs.is_empty() {
      println!("No jobs found");
    }
    for job in jobs {
      println!(
        "{:>6}  {} - {}{}",
        job.id,
        job.title,
        job.company.as_deref().unwrap_or("Company"),
        job
          .location
          .as_deref()
          .map(|l| format!(" ({})", l))
          .unwrap_or_default()
      );
    }
    Ok(())
  }

  fn cache(&self, action: CacheCommand) -> Result<()> {
    match action {
      CacheCommand::Cleanup => {
        let report = self.client.cache().cleanup()?;
        match report.force_cleared {
          Some(n) => println!("Cache was due for a full clear; removed {} entries", n),
          None => println!(
            "Removed {} expired and {} unreadable entries",
            report.expired, report.corrupt
          ),
        }
      }
      CacheCommand::Clear => {
        let removed = self.client.cache().clear_all()?;
        println!("Removed {} entries", removed);
      }
    }
    Ok(())
  }
}

fn is_auth_error(e: &Report) -> bool {
  e.downcast_ref::<ApiError>().is_some_and(ApiError::is_auth)
}

/// The session is gone by the time an auth error surfaces, so point the
/// user at `login`.
fn with_login_hint(e: Report) -> Report {
  if is_auth_error(&e) {
    e.wrap_err(format!("Signed out. {}", LOGIN_HINT))
  } else {
    e
  }
}

fn read_password() -> Result<String> {
  eprint!("Password: ");
  std::io::stderr().flush()?;
  let mut line = String::new();
  std::io::stdin().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn note_source(source: CacheSource, cached_at: Option<DateTime<Utc>>) {
  if source != CacheSource::Offline {
    return;
  }
  match cached_at {
    Some(at) => eprintln!("(offline: showing data cached {} ago)", time_ago(at, Utc::now())),
    None => eprintln!("(offline: showing cached data)"),
  }
}

/// Print messages not shown yet, in order.
fn print_new(messages: &[ChatMessage], shown: &mut HashSet<MessageId>, me: i64) {
  for msg in messages {
    if shown.insert(msg.id.clone()) {
      println!("{}", format_message(msg, me));
    }
  }
}

fn format_message(msg: &ChatMessage, me: i64) -> String {
  let who = if msg.sender.id == me {
    "You"
  } else {
    msg.sender.full_name.as_str()
  };
  let status = match msg.status {
    Some(DeliveryStatus::Sending) => " (sending)",
    Some(DeliveryStatus::Error) => " (not delivered)",
    None => "",
  };
  format!(
    "[{}] {}: {}{}",
    msg.timestamp.with_timezone(&Local).format("%H:%M"),
    who,
    msg.content,
    status
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{NoopStorage, SqliteStorage};
  use crate::session::{jwt_with_exp, Session};

  fn message(from: i64, status: Option<DeliveryStatus>) -> ChatMessage {
    ChatMessage {
      id: MessageId::Server(1),
      content: "hello".to_string(),
      sender: UserRef {
        id: from,
        full_name: "Bo".to_string(),
        avatar: None,
      },
      recipient: UserRef {
        id: 9,
        full_name: "Cy".to_string(),
        avatar: None,
      },
      timestamp: Utc::now(),
      read: false,
      status,
    }
  }

  #[test]
  fn test_format_message() {
    assert!(format_message(&message(1, None), 1).ends_with("] You: hello"));
    assert!(format_message(&message(2, None), 1).ends_with("] Bo: hello"));
    let failed = format_message(&message(1, Some(DeliveryStatus::Error)), 1);
    assert!(failed.ends_with("(not delivered)"));
  }

  #[test]
  fn test_auth_errors_get_login_hint() {
    let hinted = with_login_hint(ApiError::SessionExpired.into());
    assert!(hinted.to_string().contains("skillmatch login"));
    assert!(is_auth_error(&hinted));

    let hinted = with_login_hint(ApiError::Unauthorized.into());
    assert!(hinted.to_string().contains("skillmatch login"));

    let other = with_login_hint(eyre!("disk full"));
    assert_eq!(other.to_string(), "disk full");
  }

  #[tokio::test]
  async fn test_expired_token_points_at_login() {
    let session = SessionHandle::in_memory(Session {
      token: Some(jwt_with_exp(1)),
      user_id: Some(1),
      ..Session::default()
    });

    let app = App::new(Config::default(), session, Box::new(NoopStorage)).unwrap();
    let err = app.run(Command::Inbox { search: None }).await.unwrap_err();
    assert!(err.to_string().contains("skillmatch login"));
    assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::SessionExpired)));
    assert!(!app.session().snapshot().is_authenticated());
  }

  #[tokio::test]
  async fn test_cache_clear_keeps_other_users() {
    let session = SessionHandle::in_memory(Session {
      token: Some("opaque".to_string()),
      user_id: Some(1),
      ..Session::default()
    });
    let storage: Storage = Box::new(SqliteStorage::open_in_memory().unwrap());
    let app = App::new(Config::default(), session, storage).unwrap();

    let mine = app.client.cache();
    let theirs = mine.for_user(Some(2));
    mine.set("inbox", &1).unwrap();
    theirs.set("inbox", &2).unwrap();

    app
      .run(Command::Cache {
        action: CacheCommand::Clear,
      })
      .await
      .unwrap();

    assert_eq!(mine.get::<_, i32>("inbox").unwrap(), None);
    assert_eq!(theirs.get::<_, i32>("inbox").unwrap(), Some(2));
  }

  #[test]
  fn test_print_new_skips_shown() {
    let mut shown = HashSet::new();
    let msgs = vec![message(1, None)];
    print_new(&msgs, &mut shown, 1);
    assert_eq!(shown.len(), 1);
    print_new(&msgs, &mut shown, 1);
    assert_eq!(shown.len(), 1);
  }
}
