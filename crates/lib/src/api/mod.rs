//! Bot platform API: connection credentials for the push stream, text and file replies.
//!
//! The stream client and dispatcher only see the [`ApiClient`] trait; [`DingTalkClient`]
//! is the production implementation over the DingTalk open API.

pub(crate) mod client;
mod dingtalk;

pub use client::{ApiClient, ApiError, FileReply, Recipient, Reply, StreamCredentials};
pub use dingtalk::{DingTalkClient, MediaKind, DEFAULT_API_BASE, DEFAULT_OAPI_BASE};
