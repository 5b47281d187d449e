//! Bounded reply queue: a fixed pool of workers sends replies through the API client.
//!
//! `submit` never blocks the dispatch path. When the queue is full the reply is dropped
//! with a warning; send failures are logged and never retried.

use crate::api::{ApiClient, Reply};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ReplyQueue {
    tx: mpsc::Sender<Reply>,
}

impl ReplyQueue {
    /// Start `workers` sender tasks on `runtime` sharing a queue of `capacity` (both at least 1).
    /// Workers exit once every `ReplyQueue` clone is dropped and the queue is drained.
    pub fn spawn(
        api: Arc<dyn ApiClient>,
        workers: usize,
        capacity: usize,
        runtime: &Handle,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|id| runtime.spawn(run_worker(id, Arc::clone(&api), Arc::clone(&rx))))
            .collect();
        (Self { tx }, handles)
    }

    /// Queue a reply. Returns false if it was dropped (queue full or closed).
    pub fn submit(&self, reply: Reply) -> bool {
        match self.tx.try_send(reply) {
            Ok(()) => true,
            Err(TrySendError::Full(r)) => {
                log::warn!("reply queue full, dropping reply to {}", r.conversation_id);
                false
            }
            Err(TrySendError::Closed(r)) => {
                log::warn!("reply queue closed, dropping reply to {}", r.conversation_id);
                false
            }
        }
    }
}

async fn run_worker(id: usize, api: Arc<dyn ApiClient>, rx: Arc<Mutex<mpsc::Receiver<Reply>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(reply) = next else { break };
        match api.send_text_reply(&reply).await {
            Ok(()) => log::debug!("reply sent to {}: {}", reply.conversation_id, reply.text),
            Err(e) => log::error!("sending reply to {} failed: {}", reply.conversation_id, e),
        }
    }
    log::debug!("reply worker {} stopped", id);
}
