//! API client capability shared by the stream client and the reply workers.

use async_trait::async_trait;
use std::path::PathBuf;

/// Conversation type value DingTalk uses for group chats ("1" is one-to-one).
pub(crate) const GROUP_CONVERSATION_TYPE: &str = "2";

/// Endpoint and one-time ticket for opening the push socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCredentials {
    pub endpoint: String,
    pub ticket: String,
}

impl StreamCredentials {
    /// Socket URL: the endpoint with `ticket` appended as a query parameter.
    pub fn socket_url(&self) -> Result<reqwest::Url, String> {
        reqwest::Url::parse_with_params(&self.endpoint, &[("ticket", self.ticket.as_str())])
            .map_err(|e| format!("{}: {}", self.endpoint, e))
    }
}

/// A text reply to the conversation a command came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub conversation_id: String,
    pub conversation_type: String,
    /// Sender of the original message; required for one-to-one replies.
    pub user_id: String,
    pub text: String,
}

impl Reply {
    pub fn is_group(&self) -> bool {
        self.conversation_type == GROUP_CONVERSATION_TYPE
    }

    pub fn recipient(&self) -> Result<Recipient, ApiError> {
        Recipient::resolve(&self.conversation_id, &self.conversation_type, &self.user_id)
    }
}

/// A local file (typically the recorded clip) to upload and send to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReply {
    pub conversation_id: String,
    pub conversation_type: String,
    pub user_id: String,
    pub path: PathBuf,
}

impl FileReply {
    pub fn recipient(&self) -> Result<Recipient, ApiError> {
        Recipient::resolve(&self.conversation_id, &self.conversation_type, &self.user_id)
    }
}

/// Where a robot message goes: a group conversation or a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Group(String),
    User(String),
}

impl Recipient {
    /// Group chats are addressed by conversation id; everything else needs the sender's user id.
    pub fn resolve(conversation_id: &str, conversation_type: &str, user_id: &str) -> Result<Self, ApiError> {
        if conversation_type == GROUP_CONVERSATION_TYPE {
            return Ok(Self::Group(conversation_id.to_string()));
        }
        let user = user_id.trim();
        if user.is_empty() {
            return Err(ApiError::Config("one-to-one message requires a user id".to_string()));
        }
        Ok(Self::User(user.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("dingtalk request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("dingtalk api error: {0}")]
    Api(String),
    #[error("dingtalk response missing {0}")]
    MissingField(&'static str),
    #[error("dingtalk client not configured: {0}")]
    Config(String),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Capability the remote-control core needs from the bot platform.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetch a fresh endpoint + ticket for the push socket. May block on network and may fail.
    async fn open_connection(&self) -> Result<StreamCredentials, ApiError>;

    /// Send a text reply. Callers log failures and never retry.
    async fn send_text_reply(&self, reply: &Reply) -> Result<(), ApiError>;

    /// Upload a local file and send it to the conversation as a file message.
    async fn send_file_reply(&self, reply: &FileReply) -> Result<(), ApiError> {
        Err(ApiError::Config(format!(
            "file replies are not supported ({})",
            reply.path.display()
        )))
    }
}
