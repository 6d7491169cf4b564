//! STOMP over WebSocket, used for live chat delivery.

pub mod client;
pub mod frame;

pub use client::LiveChannel;
