use std::io::BufRead;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::types::ChatMessage;
use crate::session::AuthState;
use crate::stomp::LiveChannel;

/// Events driving an interactive chat
#[derive(Debug)]
pub enum ChatEvent {
  /// A line typed by the user
  Input(String),
  /// stdin reached EOF
  InputClosed,
  /// Message pushed over the live channel
  Incoming(ChatMessage),
  /// The live channel ended
  ChannelClosed,
  /// The session was dropped
  LoggedOut,
}

/// Merges stdin, the live channel and auth changes into one stream
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<ChatEvent>,
  stop_live: Option<oneshot::Sender<()>>,
  live: Option<JoinHandle<()>>,
}

impl EventHandler {
  pub fn new(channel: Option<LiveChannel>, mut auth: watch::Receiver<AuthState>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Blocking stdin reads live on a plain thread so they never hold up
    // runtime shutdown
    let input_tx = tx.clone();
    std::thread::spawn(move || {
      for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if input_tx.send(ChatEvent::Input(line)).is_err() {
          return;
        }
      }
      let _ = input_tx.send(ChatEvent::InputClosed);
    });

    // Spawn auth watcher
    let auth_tx = tx.clone();
    tokio::spawn(async move {
      while auth.changed().await.is_ok() {
        if *auth.borrow_and_update() == AuthState::LoginRequired {
          let _ = auth_tx.send(ChatEvent::LoggedOut);
          break;
        }
      }
    });

    // Spawn live channel forwarder
    let (stop_live, live) = match channel {
      Some(channel) => {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(forward_live(channel, tx, stop_rx));
        (Some(stop_tx), Some(handle))
      }
      None => (None, None),
    };

    Self {
      rx,
      stop_live,
      live,
    }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<ChatEvent> {
    self.rx.recv().await
  }

  /// Close the live channel, if any, and wait for it to go away.
  pub async fn shutdown(mut self) {
    if let Some(stop) = self.stop_live.take() {
      let _ = stop.send(());
    }
    if let Some(live) = self.live.take() {
      let _ = live.await;
    }
  }
}

async fn forward_live(
  mut channel: LiveChannel,
  tx: mpsc::UnboundedSender<ChatEvent>,
  mut stop: oneshot::Receiver<()>,
) {
  loop {
    tokio::select! {
      msg = channel.recv() => match msg {
        Some(msg) => {
          if tx.send(ChatEvent::Incoming(msg)).is_err() {
            break;
          }
        }
        None => {
          let _ = tx.send(ChatEvent::ChannelClosed);
          break;
        }
      },
      _ = &mut stop => break,
    }
  }
  debug!("Closing live channel");
  channel.close().await;
}
