//! Stream connection manager: fetch credentials, open the push socket, heartbeat,
//! decode + ACK every frame, and reconnect after a fixed delay until stopped.
//!
//! All socket work runs on one spawned task per `start()`. `stop()` signals that task
//! through a watch channel; every await point (credential fetch, handshake, read,
//! reconnect delay) also waits on that signal, so a pending reconnect never opens a
//! new transport after `stop()`. [`StreamClient::shutdown`] additionally waits for the task,
//! so the normal-closure frame is on the wire before the caller tears the runtime down.
//!
//! Notifications: `on_connected` once a socket is open; `on_error` then `on_disconnected`
//! when a socket fails (handshake, transport, heartbeat); `on_disconnected` alone when the
//! peer closes; `on_error` alone when credentials cannot be fetched. Nothing after `stop()`.

use crate::api::ApiClient;
use crate::config::StreamConfig;
use crate::stream::protocol::{self, ChatEvent, Envelope, FrameKind};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receiver of stream lifecycle events and routed chat messages.
///
/// Invoked from the socket task; implementations must hand work off rather than block.
pub trait MessageCallback: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    /// A `CALLBACK` chat event that mentions the bot.
    fn on_message(&self, event: ChatEvent);
    fn on_error(&self, error: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Connecting,
    Connected,
    /// Transport lost; a reconnect is pending.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(c: &StreamConfig) -> Self {
        Self {
            reconnect_delay: c.reconnect_delay(),
            heartbeat_interval: c.heartbeat_interval(),
            connect_timeout: c.connect_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("fetching stream credentials failed: {0}")]
    Credentials(#[from] crate::api::ApiError),
    #[error("invalid stream endpoint {0}")]
    InvalidEndpoint(String),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("websocket handshake timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("no heartbeat response within {0:?}")]
    HeartbeatTimeout(Duration),
}

impl StreamError {
    /// Failure of the socket itself, as opposed to credentials or a bad endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StreamError::Transport(_) | StreamError::ConnectTimeout(_) | StreamError::HeartbeatTimeout(_)
        )
    }
}

/// One `start()`..`stop()` generation: the stop signal, the worker's published state and its task.
struct Session {
    stop: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

/// Push-socket client. Safe to `start`/`stop` from any thread.
pub struct StreamClient {
    api: Arc<dyn ApiClient>,
    callback: Arc<dyn MessageCallback>,
    options: StreamOptions,
    runtime: Handle,
    running: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl StreamClient {
    /// Create a client whose socket task runs on `runtime`.
    pub fn new(
        api: Arc<dyn ApiClient>,
        callback: Arc<dyn MessageCallback>,
        options: StreamOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            api,
            callback,
            options,
            runtime,
            running: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Desired state: true between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current connection state of the active session; `Stopped` when not started.
    pub fn state(&self) -> ConnectionState {
        self.lock_session()
            .as_ref()
            .map(|s| *s.state.borrow())
            .unwrap_or(ConnectionState::Stopped)
    }

    /// Launch the connect loop in the background. No-op (with a warning) when already running.
    pub fn start(&self) {
        let mut session = self.lock_session();
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("stream client already running");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let worker = Worker {
            api: Arc::clone(&self.api),
            callback: Arc::clone(&self.callback),
            options: self.options.clone(),
            state: state_tx,
        };
        let worker = self.runtime.spawn(worker.run(stop_rx));
        *session = Some(Session {
            stop: stop_tx,
            state: state_rx,
            worker,
        });
        log::info!("stream client started");
    }

    /// Stop: close the transport with a normal closure and cancel any pending reconnect.
    /// Returns immediately; the socket task finishes on the runtime.
    pub fn stop(&self) {
        drop(self.end_session());
    }

    /// `stop()`, then wait up to `grace` for the socket task to send its close frame and exit.
    pub async fn shutdown(&self, grace: Duration) {
        let Some(worker) = self.end_session() else {
            return;
        };
        match tokio::time::timeout(grace, worker).await {
            Ok(Ok(())) => log::debug!("stream task finished"),
            Ok(Err(e)) => log::warn!("stream task failed: {}", e),
            Err(_) => log::warn!("stream task still running after {:?}", grace),
        }
    }

    fn end_session(&self) -> Option<JoinHandle<()>> {
        let mut session = self.lock_session();
        self.running.store(false, Ordering::SeqCst);
        let s = session.take()?;
        let _ = s.stop.send(true);
        log::info!("stream client stopping");
        Some(s.worker)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How a connected session ended without a transport error.
enum SessionEnd {
    /// `stop()` was requested; the socket was closed by us.
    Stopped,
    /// The peer closed the socket (or the stream ended).
    Closed,
}

struct Worker {
    api: Arc<dyn ApiClient>,
    callback: Arc<dyn MessageCallback>,
    options: StreamOptions,
    state: watch::Sender<ConnectionState>,
}

/// True once `stop()` was called or the client was dropped.
fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Resolves when a stop is requested; a dropped sender counts as a stop.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        let requested = *stop.borrow_and_update();
        if requested || stop.changed().await.is_err() {
            return;
        }
    }
}

impl Worker {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            if stop_requested(&stop) {
                break;
            }
            self.state.send_replace(ConnectionState::Connecting);
            match self.connect(&mut stop).await {
                Ok(None) => break,
                Ok(Some(socket)) => {
                    if stop_requested(&stop) {
                        break;
                    }
                    self.state.send_replace(ConnectionState::Connected);
                    log::info!("stream connected");
                    self.callback.on_connected();
                    match self.pump(socket, &mut stop).await {
                        Ok(SessionEnd::Stopped) => break,
                        Ok(SessionEnd::Closed) => {
                            if stop_requested(&stop) {
                                break;
                            }
                            log::info!("stream closed by peer");
                            self.callback.on_disconnected();
                        }
                        Err(e) => {
                            if stop_requested(&stop) {
                                break;
                            }
                            log::error!("stream connection failed: {}", e);
                            self.callback.on_error(&e.to_string());
                            self.callback.on_disconnected();
                        }
                    }
                }
                Err(e) => {
                    if stop_requested(&stop) {
                        break;
                    }
                    log::error!("stream connect failed: {}", e);
                    self.callback.on_error(&e.to_string());
                    if e.is_transport() {
                        self.callback.on_disconnected();
                    }
                }
            }
            self.state.send_replace(ConnectionState::Disconnected);
            log::info!("reconnecting in {:?}", self.options.reconnect_delay);
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }
        self.state.send_replace(ConnectionState::Stopped);
        log::info!("stream client stopped");
    }

    /// Fetch fresh credentials and open a new socket. `Ok(None)` when stopped meanwhile.
    async fn connect(&self, stop: &mut watch::Receiver<bool>) -> Result<Option<Socket>, StreamError> {
        let creds = tokio::select! {
            _ = stopped(stop) => return Ok(None),
            creds = self.api.open_connection() => creds?,
        };
        let url = creds.socket_url().map_err(StreamError::InvalidEndpoint)?;
        log::info!("connecting to {}", creds.endpoint);
        let timeout = self.options.connect_timeout;
        let handshake = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.to_string()));
        tokio::select! {
            _ = stopped(stop) => Ok(None),
            res = handshake => match res {
                Ok(Ok((socket, _))) => Ok(Some(socket)),
                Ok(Err(e)) => Err(StreamError::Transport(e)),
                Err(_) => Err(StreamError::ConnectTimeout(timeout)),
            },
        }
    }

    /// Receive loop for one socket: frames are handled strictly in arrival order.
    async fn pump(&self, socket: Socket, stop: &mut watch::Receiver<bool>) -> Result<SessionEnd, StreamError> {
        let (mut sink, mut frames) = socket.split();
        let period = self.options.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                _ = stopped(stop) => {
                    close_normally(&mut sink).await;
                    return Ok(SessionEnd::Stopped);
                }
                _ = heartbeat.tick() => {
                    if awaiting_pong {
                        return Err(StreamError::HeartbeatTimeout(period));
                    }
                    sink.send(Message::Ping(Vec::new())).await?;
                    awaiting_pong = true;
                }
                frame = frames.next() => {
                    awaiting_pong = false;
                    match frame {
                        None => return Ok(SessionEnd::Closed),
                        Some(Err(e)) => return Err(StreamError::Transport(e)),
                        Some(Ok(Message::Text(text))) => {
                            if stop_requested(stop) {
                                close_normally(&mut sink).await;
                                return Ok(SessionEnd::Stopped);
                            }
                            self.handle_frame(&text, &mut sink).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::debug!("close frame received: {:?}", frame);
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Route one frame, then ACK it if it carries a `messageId`, whatever the routing outcome.
    async fn handle_frame(
        &self,
        text: &str,
        sink: &mut SplitSink<Socket, Message>,
    ) -> Result<(), StreamError> {
        log::debug!("frame received: {}", text);
        let envelope = match protocol::decode(text) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("dropping frame: {}", e);
                return Ok(());
            }
        };
        self.route(&envelope);
        if let Some(id) = envelope.message_id.as_deref() {
            sink.send(Message::Text(protocol::encode_ack(id))).await?;
            log::debug!("ack sent: {}", id);
        }
        Ok(())
    }

    fn route(&self, envelope: &Envelope) {
        match envelope.kind() {
            FrameKind::System => {
                log::debug!("system frame, topic: {}", envelope.topic().unwrap_or("-"));
            }
            FrameKind::Callback => match envelope.chat_event() {
                Ok(event) if event.mentions_bot => {
                    log::debug!(
                        "bot message in {} from {}: {}",
                        event.conversation_id,
                        event.sender_id,
                        event.text
                    );
                    self.callback.on_message(event);
                }
                Ok(event) => {
                    log::warn!(
                        "callback in {} has no atUsers field, ignoring",
                        event.conversation_id
                    );
                }
                Err(e) => log::warn!("dropping callback: {}", e),
            },
            FrameKind::Other(t) => log::debug!("unrouted frame type {}", t),
            FrameKind::Missing => log::debug!("frame without type"),
        }
    }
}

async fn close_normally(sink: &mut SplitSink<Socket, Message>) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client stopped".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        log::debug!("close frame not sent: {}", e);
    }
}
