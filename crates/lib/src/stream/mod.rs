//! Push stream: wire protocol codec and the connection manager.
//!
//! The connection manager opens the socket with credentials from an [`crate::api::ApiClient`],
//! ACKs every frame carrying a `messageId`, and hands bot-mentioning chat events to a
//! [`MessageCallback`].

mod client;
pub mod protocol;

pub use client::{ConnectionState, MessageCallback, StreamClient, StreamError, StreamOptions};
pub use protocol::{ChatEvent, DecodeError, Envelope, FrameKind};
