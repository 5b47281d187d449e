//! Designated notification context: every listener callback runs here, one at a time.
//!
//! The socket task only posts [`UiEvent`]s; a single consumer (a spawned task, or the
//! host's own UI loop via [`MainContext::channel`]) delivers them to the listener in order.
//!
//! [`MainContext::suspend`] closes the context: events still queued are dropped undelivered
//! and new posts are discarded until [`MainContext::resume`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A validated record command, as handed to the recording action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub conversation_id: String,
    pub conversation_type: String,
    pub sender_id: String,
    pub duration_seconds: u32,
}

/// Externally visible notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ConnectionStatusChanged(bool),
    Record(RecordRequest),
}

/// Host collaborator: the recording action consumer and connectivity observer.
pub trait CommandListener: Send + Sync {
    fn on_record_command(&self, request: &RecordRequest);
    fn on_connection_status_changed(&self, connected: bool);
}

/// Shared open/closed state. Every `suspend` starts a new epoch; events carry the epoch
/// they were posted in and are only delivered while it is still current.
#[derive(Debug)]
struct Gate {
    epoch: AtomicU64,
    open: AtomicBool,
}

impl Gate {
    fn current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

#[derive(Debug)]
struct Posted {
    epoch: u64,
    event: UiEvent,
}

/// Posting side of the designated context. Cheap to clone.
#[derive(Clone)]
pub struct MainContext {
    tx: mpsc::UnboundedSender<Posted>,
    gate: Arc<Gate>,
}

/// Consuming side of a host-driven context; yields only events that are still current.
pub struct MainReceiver {
    rx: mpsc::UnboundedReceiver<Posted>,
    gate: Arc<Gate>,
}

impl MainReceiver {
    /// Next current event; `None` once every `MainContext` clone is dropped.
    pub async fn recv(&mut self) -> Option<UiEvent> {
        while let Some(posted) = self.rx.recv().await {
            if let Some(event) = self.admit(posted) {
                return Some(event);
            }
        }
        None
    }

    /// Blocking variant for a host UI thread outside the runtime.
    pub fn blocking_recv(&mut self) -> Option<UiEvent> {
        while let Some(posted) = self.rx.blocking_recv() {
            if let Some(event) = self.admit(posted) {
                return Some(event);
            }
        }
        None
    }

    /// Next current event if one is queued right now.
    pub fn try_recv(&mut self) -> Option<UiEvent> {
        while let Ok(posted) = self.rx.try_recv() {
            if let Some(event) = self.admit(posted) {
                return Some(event);
            }
        }
        None
    }

    fn admit(&self, posted: Posted) -> Option<UiEvent> {
        if self.gate.current(posted.epoch) {
            Some(posted.event)
        } else {
            log::debug!("dropping {:?} posted before suspend", posted.event);
            None
        }
    }
}

impl MainContext {
    /// Context whose events the host drains itself (e.g. on its UI thread with `blocking_recv`).
    pub fn channel() -> (Self, MainReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Gate {
            epoch: AtomicU64::new(0),
            open: AtomicBool::new(true),
        });
        (
            Self {
                tx,
                gate: Arc::clone(&gate),
            },
            MainReceiver { rx, gate },
        )
    }

    /// Context backed by one spawned task that calls `listener` sequentially.
    /// The task ends once every `MainContext` clone is dropped.
    pub fn spawn(listener: Arc<dyn CommandListener>) -> (Self, JoinHandle<()>) {
        let (ctx, rx) = Self::channel();
        let handle = tokio::spawn(run_listener(listener, rx));
        (ctx, handle)
    }

    /// Queue an event; dropped when suspended or when the consumer is gone.
    pub fn post(&self, event: UiEvent) {
        // Epoch before the open check: a post racing `suspend` ends up stale either way.
        let epoch = self.gate.epoch.load(Ordering::SeqCst);
        if !self.gate.open.load(Ordering::SeqCst) {
            log::debug!("main context suspended, dropping {:?}", event);
            return;
        }
        if let Err(e) = self.tx.send(Posted { epoch, event }) {
            log::debug!("main context closed, dropping {:?}", e.0.event);
        }
    }

    /// Stop delivering: queued events are discarded and new posts are dropped.
    /// A callback already running finishes.
    pub fn suspend(&self) {
        self.gate.open.store(false, Ordering::SeqCst);
        self.gate.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Accept and deliver events posted from now on.
    pub fn resume(&self) {
        self.gate.open.store(true, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        !self.gate.open.load(Ordering::SeqCst)
    }
}

/// Deliver current events to `listener` in order until the channel closes.
pub async fn run_listener(listener: Arc<dyn CommandListener>, mut rx: MainReceiver) {
    while let Some(event) = rx.recv().await {
        deliver(listener.as_ref(), &event);
    }
    log::debug!("main context drained");
}

/// Call the listener method matching `event`.
pub fn deliver(listener: &dyn CommandListener, event: &UiEvent) {
    match event {
        UiEvent::ConnectionStatusChanged(connected) => {
            listener.on_connection_status_changed(*connected)
        }
        UiEvent::Record(request) => listener.on_record_command(request),
    }
}
