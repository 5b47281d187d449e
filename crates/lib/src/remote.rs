//! Remote control façade: API client → stream client → dispatcher → host listener.

use crate::api::ApiClient;
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, CommandListener, MainContext, ReplyQueue};
use crate::stream::{ConnectionState, StreamClient, StreamOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// How long [`RemoteControl::shutdown`] waits for the socket to close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Options for [`RemoteControl`]; see [`Config`] for defaults.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub stream: StreamOptions,
    pub reply_workers: usize,
    pub reply_queue_capacity: usize,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RemoteOptions {
    fn from(c: &Config) -> Self {
        Self {
            stream: StreamOptions::from(&c.stream),
            reply_workers: c.replies.workers,
            reply_queue_capacity: c.replies.queue_capacity,
        }
    }
}

/// The whole remote-control channel. Must be created inside a tokio runtime.
pub struct RemoteControl {
    client: StreamClient,
    main: MainContext,
}

impl RemoteControl {
    /// Wire everything up with a spawned main context delivering to `listener`.
    pub fn new(api: Arc<dyn ApiClient>, listener: Arc<dyn CommandListener>, options: RemoteOptions) -> Self {
        let (main, _) = MainContext::spawn(listener);
        Self::with_main_context(api, main, options)
    }

    /// Wire everything up around a host-provided main context (see [`MainContext::channel`]).
    pub fn with_main_context(api: Arc<dyn ApiClient>, main: MainContext, options: RemoteOptions) -> Self {
        let runtime = Handle::current();
        let (replies, _) = ReplyQueue::spawn(
            Arc::clone(&api),
            options.reply_workers,
            options.reply_queue_capacity,
            &runtime,
        );
        let dispatcher = Arc::new(CommandDispatcher::new(replies, main.clone()));
        let client = StreamClient::new(api, dispatcher, options.stream, runtime);
        Self { client, main }
    }

    pub fn start(&self) {
        self.main.resume();
        self.client.start();
    }

    /// Stop the stream; notifications still queued for the listener are discarded.
    pub fn stop(&self) {
        self.client.stop();
        self.main.suspend();
    }

    /// `stop()` and wait (bounded) until the socket has been closed normally.
    /// Call before leaving the runtime, e.g. at process exit.
    pub async fn shutdown(&self) {
        self.main.suspend();
        self.client.shutdown(SHUTDOWN_GRACE).await;
    }

    pub fn is_running(&self) -> bool {
        self.client.is_running()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }
}
