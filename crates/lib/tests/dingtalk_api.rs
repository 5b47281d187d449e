//! Integration tests: DingTalkClient against a local axum server mocking the DingTalk API.

use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use evcam_remote::api::{ApiClient, ApiError, DingTalkClient, FileReply, MediaKind, Recipient, Reply};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Post {
    route: &'static str,
    token: Option<String>,
    body: Value,
}

#[derive(Debug, Clone)]
struct Upload {
    query: HashMap<String, String>,
    field: String,
    file_name: Option<String>,
    content: Vec<u8>,
}

#[derive(Default)]
struct Mock {
    token_calls: AtomicUsize,
    posts: Mutex<Vec<Post>>,
    uploads: Mutex<Vec<Upload>>,
}

impl Mock {
    fn record(&self, route: &'static str, headers: &HeaderMap, body: Value) {
        let token = headers
            .get("x-acs-dingtalk-access-token")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.posts.lock().expect("lock").push(Post { route, token, body });
    }

    fn posts(&self) -> Vec<Post> {
        self.posts.lock().expect("lock").clone()
    }

    fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().expect("lock").clone()
    }
}

async fn gettoken(State(mock): State<Arc<Mock>>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    mock.token_calls.fetch_add(1, Ordering::SeqCst);
    let ok = q.get("appkey").map(String::as_str) == Some("key")
        && q.get("appsecret").map(String::as_str) == Some("secret");
    if ok {
        Json(json!({ "errcode": 0, "errmsg": "ok", "access_token": "tok-1", "expires_in": 7200 }))
    } else {
        Json(json!({ "errcode": 40089, "errmsg": "invalid appkey or appsecret" }))
    }
}

async fn open_connection(State(mock): State<Arc<Mock>>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    mock.record("open", &headers, body);
    Json(json!({ "endpoint": "wss://stream.example/connect", "ticket": "tick-1" }))
}

async fn group_send(State(mock): State<Arc<Mock>>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    mock.record("group", &headers, body);
    Json(json!({ "processQueryKey": "q" }))
}

async fn oto_send(State(mock): State<Arc<Mock>>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    mock.record("oto", &headers, body);
    Json(json!({ "processQueryKey": "q" }))
}

async fn webhook(State(mock): State<Arc<Mock>>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    mock.record("hook", &headers, body);
    Json(json!({ "errcode": 0 }))
}

async fn media_upload(
    State(mock): State<Arc<Mock>>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(String::from);
        let content = field.bytes().await.expect("field bytes").to_vec();
        mock.uploads.lock().expect("lock").push(Upload {
            query: query.clone(),
            field: name,
            file_name,
            content,
        });
    }
    Json(json!({ "errcode": 0, "errmsg": "ok", "media_id": "@media-1", "type": "file" }))
}

async fn spawn_mock() -> (Arc<Mock>, String) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/gettoken", get(gettoken))
        .route("/v1.0/gateway/connections/open", post(open_connection))
        .route("/v1.0/robot/groupMessages/send", post(group_send))
        .route("/v1.0/robot/oToMessages/batchSend", post(oto_send))
        .route("/hook", post(webhook))
        .route("/media/upload", post(media_upload))
        .with_state(Arc::clone(&mock));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (mock, format!("http://{}", addr))
}

fn client(base: &str, secret: &str) -> DingTalkClient {
    DingTalkClient::new("key", secret).with_base_urls(base, base)
}

fn reply(conversation_type: &str, user_id: &str, text: &str) -> Reply {
    Reply {
        conversation_id: "cid-1".to_string(),
        conversation_type: conversation_type.to_string(),
        user_id: user_id.to_string(),
        text: text.to_string(),
    }
}

fn msg_param_content(body: &Value) -> String {
    let param: Value =
        serde_json::from_str(body["msgParam"].as_str().expect("msgParam string")).expect("msgParam json");
    param["content"].as_str().expect("content").to_string()
}

#[tokio::test]
async fn open_connection_sends_credentials_and_subscriptions() {
    let (mock, base) = spawn_mock().await;
    let creds = client(&base, "secret").open_connection().await.expect("credentials");
    assert_eq!(creds.endpoint, "wss://stream.example/connect");
    assert_eq!(creds.ticket, "tick-1");

    let posts = mock.posts();
    assert_eq!(posts.len(), 1);
    let body = &posts[0].body;
    assert_eq!(body["clientId"], "key");
    assert_eq!(body["clientSecret"], "secret");
    let topics: Vec<&str> = body["subscriptions"]
        .as_array()
        .expect("subscriptions")
        .iter()
        .filter_map(|s| s["topic"].as_str())
        .collect();
    assert_eq!(topics, vec!["/v1.0/im/bot/messages/get", "*"]);
}

#[tokio::test]
async fn one_to_one_reply_uses_batch_send() {
    let (mock, base) = spawn_mock().await;
    client(&base, "secret")
        .send_text_reply(&reply("1", "staff-1", "hello"))
        .await
        .expect("send");
    let posts = mock.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].route, "oto");
    assert_eq!(posts[0].token.as_deref(), Some("tok-1"));
    assert_eq!(posts[0].body["userIds"], json!(["staff-1"]));
    assert_eq!(posts[0].body["robotCode"], "key");
    assert_eq!(msg_param_content(&posts[0].body), "hello");
}

#[tokio::test]
async fn group_reply_uses_group_api_and_caches_token() {
    let (mock, base) = spawn_mock().await;
    let c = client(&base, "secret");
    c.send_text_reply(&reply("2", "staff-1", "one")).await.expect("send one");
    c.send_text_reply(&reply("2", "staff-1", "two")).await.expect("send two");

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    let posts = mock.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.route == "group"));
    assert_eq!(posts[0].body["openConversationId"], "cid-1");
    assert_eq!(msg_param_content(&posts[1].body), "two");
}

#[tokio::test]
async fn group_reply_prefers_webhook() {
    let (mock, base) = spawn_mock().await;
    let c = client(&base, "secret").with_webhook(format!("{}/hook", base));
    c.send_text_reply(&reply("2", "staff-1", "via hook")).await.expect("send");
    let posts = mock.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].route, "hook");
    assert_eq!(posts[0].body, json!({ "msgtype": "text", "text": { "content": "via hook" } }));
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_errcode_is_an_api_error() {
    let (mock, base) = spawn_mock().await;
    let err = client(&base, "wrong").access_token().await.expect_err("should fail");
    assert!(matches!(err, ApiError::Api(_)), "{}", err);
    assert!(mock.posts().is_empty());
}

#[tokio::test]
async fn one_to_one_reply_requires_user() {
    let (mock, base) = spawn_mock().await;
    let err = client(&base, "secret")
        .send_text_reply(&reply("1", "  ", "hello"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, ApiError::Config(_)));
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
}

fn temp_clip(name: &str, content: &[u8]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("evcam-api-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write clip");
    path
}

#[tokio::test]
async fn upload_media_sends_multipart_with_token_and_type() {
    let (mock, base) = spawn_mock().await;
    let path = temp_clip("clip.mp4", b"fake mp4 bytes");
    let media_id = client(&base, "secret")
        .upload_media(&path, MediaKind::Video)
        .await
        .expect("upload");
    assert_eq!(media_id, "@media-1");

    let uploads = mock.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].field, "media");
    assert_eq!(uploads[0].file_name.as_deref(), Some("clip.mp4"));
    assert_eq!(uploads[0].content, b"fake mp4 bytes");
    assert_eq!(uploads[0].query.get("access_token").map(String::as_str), Some("tok-1"));
    assert_eq!(uploads[0].query.get("type").map(String::as_str), Some("video"));
    let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
}

#[tokio::test]
async fn upload_of_missing_file_is_io_error() {
    let (mock, base) = spawn_mock().await;
    let err = client(&base, "secret")
        .upload_media(std::path::Path::new("/nonexistent/evcam/clip.mp4"), MediaKind::File)
        .await
        .expect_err("should fail");
    assert!(matches!(err, ApiError::Io { .. }), "{}", err);
    assert!(mock.uploads().is_empty());
}

#[tokio::test]
async fn file_reply_uploads_then_sends_file_card_to_group() {
    let (mock, base) = spawn_mock().await;
    let path = temp_clip("rec_20260101_120000.mp4", b"clip");
    // Webhooks only carry text; file cards always use the robot API.
    let c = client(&base, "secret").with_webhook(format!("{}/hook", base));
    c.send_file_reply(&FileReply {
        conversation_id: "cid-1".to_string(),
        conversation_type: "2".to_string(),
        user_id: "staff-1".to_string(),
        path: path.clone(),
    })
    .await
    .expect("file reply");

    assert_eq!(mock.uploads().len(), 1);
    assert_eq!(mock.uploads()[0].query.get("type").map(String::as_str), Some("file"));
    let posts = mock.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].route, "group");
    assert_eq!(posts[0].body["msgKey"], "sampleFile");
    let param: Value = serde_json::from_str(posts[0].body["msgParam"].as_str().expect("msgParam")).expect("json");
    assert_eq!(param["mediaId"], "@media-1");
    assert_eq!(param["fileName"], "rec_20260101_120000.mp4");
    assert_eq!(param["fileType"], "mp4");
    let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
}

#[tokio::test]
async fn one_to_one_file_reply_requires_user_before_uploading() {
    let (mock, base) = spawn_mock().await;
    let err = client(&base, "secret")
        .send_file_reply(&FileReply {
            conversation_id: "cid-1".to_string(),
            conversation_type: "1".to_string(),
            user_id: String::new(),
            path: "/tmp/unused.mp4".into(),
        })
        .await
        .expect_err("should fail");
    assert!(matches!(err, ApiError::Config(_)));
    assert!(mock.uploads().is_empty());
}

#[tokio::test]
async fn video_and_markdown_messages_route_by_recipient() {
    let (mock, base) = spawn_mock().await;
    let c = client(&base, "secret");
    c.send_video_message(&Recipient::User("staff-1".to_string()), "@v", "@p", 30)
        .await
        .expect("video");
    c.send_markdown_message(&Recipient::Group("cid-1".to_string()), "录制完成", "**30s**")
        .await
        .expect("markdown");

    let posts = mock.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].route, "oto");
    assert_eq!(posts[0].body["msgKey"], "sampleVideo");
    let video: Value = serde_json::from_str(posts[0].body["msgParam"].as_str().expect("msgParam")).expect("json");
    assert_eq!(video["videoMediaId"], "@v");
    assert_eq!(video["picMediaId"], "@p");
    assert_eq!(video["videoType"], "mp4");
    assert_eq!(video["duration"], "30");

    assert_eq!(posts[1].route, "group");
    assert_eq!(posts[1].body["msgKey"], "sampleMarkdown");
    let md: Value = serde_json::from_str(posts[1].body["msgParam"].as_str().expect("msgParam")).expect("json");
    assert_eq!(md["title"], "录制完成");
    assert_eq!(md["text"], "**30s**");
}
