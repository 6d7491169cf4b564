//! Chat state kept in step with the REST API, the cache and the live socket.

pub mod conversation;
pub mod inbox;
pub mod share;
pub mod sync;

pub use conversation::ConversationSession;
pub use inbox::Inbox;
pub use share::ShareJob;
pub use sync::SendOutcome;
