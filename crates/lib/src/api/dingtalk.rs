//! DingTalk open API client: access token, stream gateway connection, robot messages
//! (text, markdown, file, video) and media upload.

use crate::api::client::{ApiClient, ApiError, FileReply, Recipient, Reply, StreamCredentials};
use crate::config::{self, Config};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_API_BASE: &str = "https://api.dingtalk.com";
pub const DEFAULT_OAPI_BASE: &str = "https://oapi.dingtalk.com";

const ACCESS_TOKEN_HEADER: &str = "x-acs-dingtalk-access-token";
const BOT_MESSAGE_TOPIC: &str = "/v1.0/im/bot/messages/get";
/// Tokens are refreshed this long before DingTalk says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Display height DingTalk uses for video cards.
const VIDEO_HEIGHT: &str = "200";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: Option<String>,
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ConnectionResponse {
    endpoint: Option<String>,
    ticket: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: Option<String>,
    media_id: Option<String>,
}

/// Media types accepted by `/media/upload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    File,
    Image,
    Voice,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::File => "file",
            MediaKind::Image => "image",
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// DingTalk robot client (app key/secret credentials).
pub struct DingTalkClient {
    client_id: String,
    client_secret: String,
    webhook_url: Option<String>,
    api_base: String,
    oapi_base: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl DingTalkClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("http client setup failed ({}); using defaults without request timeout", e);
                reqwest::Client::new()
            });
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_url: None,
            api_base: DEFAULT_API_BASE.to_string(),
            oapi_base: DEFAULT_OAPI_BASE.to_string(),
            client,
            token: Mutex::new(None),
        }
    }

    /// Build from config; credentials resolved with env overrides. Errors when either is missing.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let client_id = config::resolve_client_id(config)
            .ok_or_else(|| ApiError::Config("clientId (or DINGTALK_CLIENT_ID) not set".to_string()))?;
        let client_secret = config::resolve_client_secret(config).ok_or_else(|| {
            ApiError::Config("clientSecret (or DINGTALK_CLIENT_SECRET) not set".to_string())
        })?;
        let d = &config.dingtalk;
        let mut c = Self::new(client_id, client_secret).with_base_urls(
            d.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE),
            d.oapi_base_url.as_deref().unwrap_or(DEFAULT_OAPI_BASE),
        );
        c.webhook_url = d
            .webhook_url
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(c)
    }

    /// Override API hosts (custom endpoints, tests).
    pub fn with_base_urls(mut self, api_base: &str, oapi_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.oapi_base = oapi_base.trim_end_matches('/').to_string();
        self
    }

    /// Group text replies go to this webhook when set instead of the group message API.
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// GET /gettoken, cached until shortly before expiry.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() < t.expires_at {
                log::debug!("using cached dingtalk access token");
                return Ok(t.value.clone());
            }
        }
        let url = format!("{}/gettoken", self.oapi_base);
        let res = self
            .client
            .get(&url)
            .query(&[("appkey", &self.client_id), ("appsecret", &self.client_secret)])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("gettoken failed: {} {}", status, body)));
        }
        let data: TokenResponse = res.json().await?;
        if data.errcode != 0 {
            return Err(ApiError::Api(format!(
                "gettoken errcode={} errmsg={}",
                data.errcode,
                data.errmsg.unwrap_or_default()
            )));
        }
        let value = data.access_token.ok_or(ApiError::MissingField("access_token"))?;
        let ttl = data.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        log::debug!("fetched new dingtalk access token (valid {}s)", ttl);
        Ok(value)
    }

    /// POST /media/upload (multipart field `media`). Returns the `media_id`.
    pub async fn upload_media(&self, path: &Path, kind: MediaKind) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = file_name_of(path);
        log::info!("uploading {} ({} bytes) as {}", file_name, bytes.len(), kind.as_str());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("media", part);

        let token = self.access_token().await?;
        let url = format!("{}/media/upload", self.oapi_base);
        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", kind.as_str())])
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("media upload failed: {} {}", status, body)));
        }
        let data: UploadResponse = res.json().await?;
        if data.errcode != 0 {
            return Err(ApiError::Api(format!(
                "media upload errcode={} errmsg={}",
                data.errcode,
                data.errmsg.unwrap_or_default()
            )));
        }
        let media_id = data.media_id.ok_or(ApiError::MissingField("media_id"))?;
        log::debug!("{} uploaded, media_id {}", kind.as_str(), media_id);
        Ok(media_id)
    }

    /// Plain text message through the robot API (no webhook).
    pub async fn send_text_message(&self, to: &Recipient, text: &str) -> Result<(), ApiError> {
        self.send_robot_message(to, "sampleText", json!({ "content": text }))
            .await
    }

    pub async fn send_markdown_message(&self, to: &Recipient, title: &str, text: &str) -> Result<(), ApiError> {
        self.send_robot_message(to, "sampleMarkdown", json!({ "title": title, "text": text }))
            .await
    }

    /// File card for an uploaded `media_id`.
    pub async fn send_file_message(&self, to: &Recipient, media_id: &str, file_name: &str) -> Result<(), ApiError> {
        let file_type = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let param = json!({ "mediaId": media_id, "fileName": file_name, "fileType": file_type });
        self.send_robot_message(to, "sampleFile", param).await
    }

    /// Playable mp4 card; `pic_media_id` is an uploaded cover image.
    pub async fn send_video_message(
        &self,
        to: &Recipient,
        video_media_id: &str,
        pic_media_id: &str,
        duration_seconds: u32,
    ) -> Result<(), ApiError> {
        let param = json!({
            "videoMediaId": video_media_id,
            "picMediaId": pic_media_id,
            "videoType": "mp4",
            "duration": duration_seconds.to_string(),
            "height": VIDEO_HEIGHT,
        });
        self.send_robot_message(to, "sampleVideo", param).await
    }

    /// groupMessages/send or oToMessages/batchSend, depending on the recipient.
    async fn send_robot_message(&self, to: &Recipient, msg_key: &str, msg_param: Value) -> Result<(), ApiError> {
        let token = self.access_token().await?;
        let (url, mut body) = match to {
            Recipient::Group(conversation_id) => (
                format!("{}/v1.0/robot/groupMessages/send", self.api_base),
                json!({ "openConversationId": conversation_id }),
            ),
            Recipient::User(user_id) => (
                format!("{}/v1.0/robot/oToMessages/batchSend", self.api_base),
                json!({ "userIds": [user_id] }),
            ),
        };
        if let Value::Object(map) = &mut body {
            map.insert("robotCode".to_string(), json!(self.client_id));
            map.insert("msgKey".to_string(), json!(msg_key));
            map.insert("msgParam".to_string(), json!(msg_param.to_string()));
        }
        log::debug!("sending {} to {:?}", msg_key, to);
        self.post_json(&url, &body, Some(&token)).await
    }

    async fn post_json(&self, url: &str, body: &Value, token: Option<&str>) -> Result<(), ApiError> {
        let mut req = self.client.post(url).json(body);
        if let Some(t) = token {
            req = req.header(ACCESS_TOKEN_HEADER, t);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("POST {} failed: {} {}", url, status, body)));
        }
        Ok(())
    }

    async fn send_via_webhook(&self, webhook: &str, text: &str) -> Result<(), ApiError> {
        let body = json!({ "msgtype": "text", "text": { "content": text } });
        self.post_json(webhook, &body, None).await
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string())
}

#[async_trait]
impl ApiClient for DingTalkClient {
    /// POST /v1.0/gateway/connections/open; subscribes to bot messages.
    async fn open_connection(&self) -> Result<StreamCredentials, ApiError> {
        let url = format!("{}/v1.0/gateway/connections/open", self.api_base);
        let body = json!({
            "clientId": self.client_id,
            "clientSecret": self.client_secret,
            "subscriptions": [
                { "type": "CALLBACK", "topic": BOT_MESSAGE_TOPIC },
                { "type": "CALLBACK", "topic": "*" },
            ],
        });
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("connections/open failed: {} {}", status, body)));
        }
        let data: ConnectionResponse = res.json().await?;
        let endpoint = data.endpoint.ok_or(ApiError::MissingField("endpoint"))?;
        let ticket = data.ticket.ok_or(ApiError::MissingField("ticket"))?;
        log::debug!("stream connection credentials obtained for {}", endpoint);
        Ok(StreamCredentials { endpoint, ticket })
    }

    async fn send_text_reply(&self, reply: &Reply) -> Result<(), ApiError> {
        if reply.is_group() {
            if let Some(webhook) = self.webhook_url.as_deref() {
                return self.send_via_webhook(webhook, &reply.text).await;
            }
        }
        let to = reply.recipient()?;
        self.send_text_message(&to, &reply.text).await
    }

    async fn send_file_reply(&self, reply: &FileReply) -> Result<(), ApiError> {
        let to = reply.recipient()?;
        let media_id = self.upload_media(&reply.path, MediaKind::File).await?;
        self.send_file_message(&to, &media_id, &file_name_of(&reply.path))
            .await
    }
}
