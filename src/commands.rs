//! Subcommands of the `skillmatch` binary.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Sign in and store the session
  Login {
    #[arg(short, long)]
    email: String,

    /// Read from stdin when omitted
    #[arg(short, long)]
    password: Option<String>,
  },

  /// Forget the stored session
  Logout,

  /// Show the signed-in user
  Whoami,

  /// List conversations, most recent first
  Inbox {
    /// Only conversations whose partner's name contains this
    #[arg(short, long)]
    search: Option<String>,
  },

  /// Open a live conversation with a user
  Chat {
    /// User id of the other participant
    user: i64,
  },

  /// Send a single message
  Send { user: i64, text: String },

  /// Share a job post by direct message. Lists recipients when no user is
  /// given.
  Share {
    job_id: i64,
    user: Option<i64>,

    /// Filter the recipient list by name
    #[arg(short, long)]
    search: Option<String>,
  },

  /// List your connections
  Connections {
    /// Show incoming requests instead
    #[arg(long, conflicts_with = "recommended")]
    pending: bool,

    /// Show people you may know instead
    #[arg(long)]
    recommended: bool,
  },

  /// Send a connection request
  Connect { user: i64 },

  /// Accept an incoming connection request
  Accept { request: i64 },

  /// List notifications
  Notifications {
    /// Mark every notification as read first
    #[arg(long)]
    read_all: bool,

    /// Mark one notification as read first
    #[arg(long, value_name = "ID")]
    read: Option<i64>,

    /// Delete one notification first
    #[arg(long, value_name = "ID")]
    delete: Option<i64>,
  },

  /// List job posts
  Jobs {
    /// Jobs recommended for you instead of the latest posts
    #[arg(long)]
    recommended: bool,
  },

  /// Local cache maintenance
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheCommand {
  /// Drop expired and unreadable entries
  Cleanup,
  /// Drop every cached entry of the signed-in user (or the guest)
  Clear,
}

impl Command {
  /// Whether the command can run without a stored session.
  pub fn is_anonymous(&self) -> bool {
    matches!(
      self,
      Command::Login { .. } | Command::Logout | Command::Whoami | Command::Cache { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("skillmatch").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_parse_send() {
    match parse(&["send", "7", "hello there"]) {
      Command::Send { user, text } => {
        assert_eq!(user, 7);
        assert_eq!(text, "hello there");
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_parse_flags() {
    assert!(matches!(
      parse(&["notifications", "--read-all"]),
      Command::Notifications {
        read_all: true,
        read: None,
        delete: None
      }
    ));
    assert!(matches!(
      parse(&["cache", "cleanup"]),
      Command::Cache {
        action: CacheCommand::Cleanup
      }
    ));
    assert!(matches!(
      parse(&["inbox", "--search", "bo"]),
      Command::Inbox { search: Some(ref s) } if s == "bo"
    ));
  }

  #[test]
  fn test_anonymous_commands() {
    assert!(parse(&["whoami"]).is_anonymous());
    assert!(!parse(&["inbox"]).is_anonymous());
  }
}
