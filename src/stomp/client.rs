//! Live message delivery over STOMP on a WebSocket.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::frame::{Command, Frame, FrameError, StompFrame};
use crate::api::types::ChatMessage;
use crate::api::ApiError;
use crate::session::{is_token_expired, SessionHandle};

/// Per-user queue the backend pushes chat messages to
pub const QUEUE_DESTINATION: &str = "/user/queue/messages";

/// Heart-beat interval we offer in both directions, in milliseconds
const HEARTBEAT_MS: u64 = 10_000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ChannelError {
  #[error("not signed in")]
  NotAuthenticated,

  #[error("server rejected connection: {0}")]
  Rejected(String),

  #[error("connection closed during handshake")]
  Closed,

  #[error("timed out waiting for CONNECTED")]
  Timeout,

  #[error(transparent)]
  Frame(#[from] FrameError),

  #[error("websocket error: {0}")]
  WebSocket(#[from] tungstenite::Error),
}

/// Subscription to the signed-in user's message queue.
///
/// Messages arrive at most once and in no particular order relative to REST
/// fetches. `recv` returns `None` once the server closes the stream or sends
/// an `ERROR` frame.
pub struct LiveChannel {
  outgoing: mpsc::Sender<Frame>,
  incoming: mpsc::Receiver<ChatMessage>,
  reader: JoinHandle<()>,
  writer: JoinHandle<()>,
}

impl LiveChannel {
  pub async fn connect(ws_url: &str, session: &SessionHandle) -> Result<Self> {
    let token = session.token().ok_or(ChannelError::NotAuthenticated)?;
    if is_token_expired(&token, Utc::now()) {
      session.clear();
      return Err(ApiError::SessionExpired.into());
    }

    let url =
      Url::parse(ws_url).map_err(|e| eyre!("Invalid websocket URL {}: {}", ws_url, e))?;
    let host = url.host_str().unwrap_or("localhost").to_string();

    debug!("Connecting to {}", ws_url);
    let (ws, _) = connect_async(ws_url).await.map_err(ChannelError::from)?;
    let (mut sink, mut stream) = ws.split();

    let connect = StompFrame::new(Command::Connect)
      .header("accept-version", "1.2")
      .header("host", host)
      .header("heart-beat", format!("{},{}", HEARTBEAT_MS, HEARTBEAT_MS))
      .header("Authorization", format!("Bearer {}", token));
    send_frame(&mut sink, &Frame::Stomp(connect)).await?;

    let connected = timeout(CONNECT_TIMEOUT, await_connected(&mut stream))
      .await
      .map_err(|_| ChannelError::Timeout)??;
    let heartbeat = outgoing_heartbeat(HEARTBEAT_MS, connected.get("heart-beat"));
    info!(
      "STOMP session established (version {})",
      connected.get("version").unwrap_or("1.0")
    );

    let subscribe = StompFrame::new(Command::Subscribe)
      .header("id", "sub-0")
      .header("destination", QUEUE_DESTINATION)
      .header("ack", "auto");
    send_frame(&mut sink, &Frame::Stomp(subscribe)).await?;

    let (out_tx, out_rx) = mpsc::channel(16);
    let (in_tx, in_rx) = mpsc::channel(64);

    Ok(Self {
      outgoing: out_tx,
      incoming: in_rx,
      reader: tokio::spawn(read_loop(stream, in_tx)),
      writer: tokio::spawn(write_loop(sink, out_rx, heartbeat)),
    })
  }

  /// Next delivered message, or `None` when the channel has ended.
  pub async fn recv(&mut self) -> Option<ChatMessage> {
    self.incoming.recv().await
  }

  /// Send DISCONNECT and close the socket.
  pub async fn close(self) {
    let LiveChannel {
      outgoing,
      reader,
      writer,
      ..
    } = self;

    let disconnect = Frame::Stomp(StompFrame::new(Command::Disconnect));
    if outgoing.send(disconnect).await.is_err() {
      debug!("Live channel writer already gone");
    }
    drop(outgoing);

    if timeout(CLOSE_TIMEOUT, writer).await.is_err() {
      warn!("Timed out closing live channel");
    }
    reader.abort();
  }
}

/// Interval at which we must send heart-beats, given what we offered and the
/// server's `heart-beat` header. `None` means no heart-beats.
fn outgoing_heartbeat(offered_ms: u64, server: Option<&str>) -> Option<Duration> {
  let wanted_ms = server?
    .split(',')
    .nth(1)
    .and_then(|v| v.trim().parse::<u64>().ok())?;
  if offered_ms == 0 || wanted_ms == 0 {
    return None;
  }
  Some(Duration::from_millis(offered_ms.max(wanted_ms)))
}

fn payload(msg: &Message) -> Option<&str> {
  match msg {
    Message::Text(text) => Some(text.as_str()),
    Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
    _ => None,
  }
}

async fn send_frame(
  sink: &mut SplitSink<WsStream, Message>,
  frame: &Frame,
) -> Result<(), ChannelError> {
  sink.send(Message::text(frame.encode())).await?;
  Ok(())
}

async fn await_connected(stream: &mut SplitStream<WsStream>) -> Result<StompFrame, ChannelError> {
  while let Some(msg) = stream.next().await {
    let msg = msg?;
    if let Message::Close(_) = msg {
      break;
    }
    let Some(text) = payload(&msg) else {
      continue;
    };
    match Frame::decode(text)? {
      Frame::Stomp(frame) if frame.command == Command::Connected => return Ok(frame),
      Frame::Stomp(frame) if frame.command == Command::Error => {
        let reason = frame.get("message").unwrap_or(&frame.body).to_string();
        return Err(ChannelError::Rejected(reason));
      }
      other => trace!("Skipping {:?} before CONNECTED", other),
    }
  }
  Err(ChannelError::Closed)
}

async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<ChatMessage>) {
  while let Some(msg) = stream.next().await {
    let msg = match msg {
      Ok(msg) => msg,
      Err(e) => {
        warn!("Live channel read failed: {}", e);
        break;
      }
    };
    if let Message::Close(_) = msg {
      debug!("Server closed the live channel");
      break;
    }
    let Some(text) = payload(&msg) else {
      continue;
    };

    match Frame::decode(text) {
      Ok(Frame::Heartbeat) => trace!("heart-beat"),
      Ok(Frame::Stomp(frame)) => match frame.command {
        Command::Message => match serde_json::from_str::<ChatMessage>(&frame.body) {
          Ok(chat) => {
            if tx.send(chat).await.is_err() {
              break;
            }
          }
          Err(e) => warn!("Dropping undecodable chat message: {}", e),
        },
        Command::Error => {
          error!(
            "Server sent ERROR: {}",
            frame.get("message").unwrap_or(&frame.body)
          );
          break;
        }
        other => debug!("Ignoring {} frame", other),
      },
      Err(e) => warn!("Dropping malformed frame: {}", e),
    }
  }
  info!("Live channel ended");
}

async fn tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(ticker) => {
      ticker.tick().await;
    }
    None => std::future::pending().await,
  }
}

async fn write_loop(
  mut sink: SplitSink<WsStream, Message>,
  mut rx: mpsc::Receiver<Frame>,
  heartbeat: Option<Duration>,
) {
  let mut ticker = heartbeat.map(|every| {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
  });

  loop {
    tokio::select! {
      frame = rx.recv() => {
        let Some(frame) = frame else { break };
        let last = matches!(&frame, Frame::Stomp(f) if f.command == Command::Disconnect);
        if let Err(e) = send_frame(&mut sink, &frame).await {
          warn!("Live channel write failed: {}", e);
          break;
        }
        if last {
          break;
        }
      }
      _ = tick(&mut ticker) => {
        if let Err(e) = send_frame(&mut sink, &Frame::Heartbeat).await {
          warn!("Heart-beat failed: {}", e);
          break;
        }
      }
    }
  }

  if let Err(e) = sink.close().await {
    debug!("Error closing websocket: {}", e);
  }
}
