//! STOMP 1.2 frame codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, the
//! body and a NUL octet. A bare EOL between frames is a heart-beat.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
  #[error("empty frame")]
  Empty,

  #[error("unknown STOMP command: {0}")]
  UnknownCommand(String),

  #[error("malformed header line: {0}")]
  MalformedHeader(String),

  #[error("invalid escape sequence in header: {0}")]
  BadEscape(String),

  #[error("frame is not NUL terminated")]
  Unterminated,

  #[error("invalid content-length: {0}")]
  BadContentLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Connect,
  Connected,
  Subscribe,
  Unsubscribe,
  Send,
  Message,
  Receipt,
  Error,
  Disconnect,
}

impl Command {
  pub fn as_str(self) -> &'static str {
    match self {
      Command::Connect => "CONNECT",
      Command::Connected => "CONNECTED",
      Command::Subscribe => "SUBSCRIBE",
      Command::Unsubscribe => "UNSUBSCRIBE",
      Command::Send => "SEND",
      Command::Message => "MESSAGE",
      Command::Receipt => "RECEIPT",
      Command::Error => "ERROR",
      Command::Disconnect => "DISCONNECT",
    }
  }

  fn parse(s: &str) -> Result<Self, FrameError> {
    Ok(match s {
      "CONNECT" | "STOMP" => Command::Connect,
      "CONNECTED" => Command::Connected,
      "SUBSCRIBE" => Command::Subscribe,
      "UNSUBSCRIBE" => Command::Unsubscribe,
      "SEND" => Command::Send,
      "MESSAGE" => Command::Message,
      "RECEIPT" => Command::Receipt,
      "ERROR" => Command::Error,
      "DISCONNECT" => Command::Disconnect,
      other => return Err(FrameError::UnknownCommand(other.to_string())),
    })
  }

  /// CONNECT and CONNECTED headers are sent without escaping.
  fn escapes_headers(self) -> bool {
    !matches!(self, Command::Connect | Command::Connected)
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A STOMP frame with a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
  pub command: Command,
  /// In wire order. Repeated names are kept; the first one wins on lookup.
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl StompFrame {
  pub fn new(command: Command) -> Self {
    Self {
      command,
      headers: Vec::new(),
      body: String::new(),
    }
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn body(mut self, body: impl Into<String>) -> Self {
    self.body = body.into();
    self
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn encode(&self) -> String {
    let escape = self.command.escapes_headers();
    let mut out = String::with_capacity(64 + self.body.len());
    out.push_str(self.command.as_str());
    out.push('\n');
    for (name, value) in &self.headers {
      if escape {
        out.push_str(&escape_header(name));
        out.push(':');
        out.push_str(&escape_header(value));
      } else {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
      }
      out.push('\n');
    }
    if !self.body.is_empty() && self.get("content-length").is_none() {
      out.push_str(&format!("content-length:{}\n", self.body.len()));
    }
    out.push('\n');
    out.push_str(&self.body);
    out.push('\0');
    out
  }
}

/// One unit read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  Heartbeat,
  Stomp(StompFrame),
}

impl Frame {
  /// Decode one WebSocket text payload.
  pub fn decode(input: &str) -> Result<Frame, FrameError> {
    let input = input.trim_start_matches(['\r', '\n']);
    if input.is_empty() {
      return Ok(Frame::Heartbeat);
    }

    let (head, rest) = split_head(input).ok_or(FrameError::Unterminated)?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command = match lines.next() {
      Some(line) if !line.is_empty() => Command::parse(line)?,
      _ => return Err(FrameError::Empty),
    };

    let mut headers = Vec::new();
    for line in lines {
      let (name, value) = line
        .split_once(':')
        .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
      if command.escapes_headers() {
        headers.push((unescape_header(name)?, unescape_header(value)?));
      } else {
        headers.push((name.to_string(), value.to_string()));
      }
    }

    let length = headers
      .iter()
      .find(|(k, _)| k == "content-length")
      .map(|(_, v)| {
        v.trim()
          .parse::<usize>()
          .map_err(|_| FrameError::BadContentLength(v.clone()))
      })
      .transpose()?;

    let body = match length {
      Some(len) => {
        let body = rest.get(..len).ok_or(FrameError::Unterminated)?;
        if !rest[len..].starts_with('\0') {
          return Err(FrameError::Unterminated);
        }
        body
      }
      None => {
        let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
        &rest[..end]
      }
    };

    Ok(Frame::Stomp(StompFrame {
      command,
      headers,
      body: body.to_string(),
    }))
  }

  pub fn encode(&self) -> String {
    match self {
      Frame::Heartbeat => "\n".to_string(),
      Frame::Stomp(frame) => frame.encode(),
    }
  }
}

/// Split at the blank line ending the headers.
fn split_head(input: &str) -> Option<(&str, &str)> {
  let lf = input.find("\n\n").map(|i| (i, 2));
  let crlf = input.find("\r\n\r\n").map(|i| (i, 4));
  let (at, sep) = match (lf, crlf) {
    (Some(a), Some(b)) => a.min(b),
    (a, b) => a.or(b)?,
  };
  Some((&input[..at], &input[at + sep..]))
}

fn escape_header(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      ':' => out.push_str("\\c"),
      c => out.push(c),
    }
  }
  out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('\\') => out.push('\\'),
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('c') => out.push(':'),
      _ => return Err(FrameError::BadEscape(s.to_string())),
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stomp(input: &str) -> StompFrame {
    match Frame::decode(input).unwrap() {
      Frame::Stomp(frame) => frame,
      Frame::Heartbeat => panic!("expected a frame, got a heart-beat"),
    }
  }

  #[test]
  fn test_heartbeats() {
    assert_eq!(Frame::decode("\n").unwrap(), Frame::Heartbeat);
    assert_eq!(Frame::decode("\r\n").unwrap(), Frame::Heartbeat);
    assert_eq!(Frame::Heartbeat.encode(), "\n");
  }

  #[test]
  fn test_decode_message() {
    let frame = stomp(
      "MESSAGE\ndestination:/user/queue/messages\nmessage-id:1\nsubscription:sub-0\n\n{\"id\":1}\0",
    );
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.get("destination"), Some("/user/queue/messages"));
    assert_eq!(frame.body, "{\"id\":1}");
  }

  #[test]
  fn test_decode_crlf_and_leading_eols() {
    let frame = stomp("\n\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0");
    assert_eq!(frame.command, Command::Connected);
    assert_eq!(frame.get("version"), Some("1.2"));
    assert_eq!(frame.body, "");
  }

  #[test]
  fn test_content_length_allows_nul_in_body() {
    let frame = stomp("MESSAGE\ncontent-length:3\n\na\0b\0");
    assert_eq!(frame.body, "a\0b");
  }

  #[test]
  fn test_first_repeated_header_wins() {
    let frame = stomp("MESSAGE\nfoo:first\nfoo:second\n\n\0");
    assert_eq!(frame.get("foo"), Some("first"));
    assert_eq!(frame.headers.len(), 2);
  }

  #[test]
  fn test_header_escaping() {
    let frame = StompFrame::new(Command::Send)
      .header("destination", "/app/chat")
      .header("note", "a:b\\c\nd");
    let wire = frame.encode();
    assert!(wire.contains("note:a\\cb\\\\c\\nd\n"));

    let back = stomp(&wire);
    assert_eq!(back.get("note"), Some("a:b\\c\nd"));
  }

  #[test]
  fn test_connect_headers_are_not_escaped() {
    let wire = StompFrame::new(Command::Connect)
      .header("host", "localhost:8080")
      .encode();
    assert!(wire.contains("host:localhost:8080\n"));
  }

  #[test]
  fn test_encode_adds_content_length() {
    let wire = StompFrame::new(Command::Send)
      .header("destination", "/app/chat")
      .body("héllo")
      .encode();
    assert_eq!(
      wire,
      "SEND\ndestination:/app/chat\ncontent-length:6\n\nhéllo\0"
    );
  }

  #[test]
  fn test_decode_errors() {
    assert_eq!(
      Frame::decode("BOGUS\n\n\0"),
      Err(FrameError::UnknownCommand("BOGUS".to_string()))
    );
    assert_eq!(Frame::decode("MESSAGE\n\nbody"), Err(FrameError::Unterminated));
    assert!(matches!(
      Frame::decode("MESSAGE\nno-colon\n\n\0"),
      Err(FrameError::MalformedHeader(_))
    ));
    assert!(matches!(
      Frame::decode("MESSAGE\nbad:\\t\n\n\0"),
      Err(FrameError::BadEscape(_))
    ));
  }
}
