//! Control channel: request/reply messages from the host page.
//!
//! Every message travels with its own correlation id and a single-use
//! `oneshot` reply sender, so concurrent callers never see each other's
//! replies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::store::SharedStore;
use crate::layer::lifecycle::{LifecycleController, LifecycleState};
use crate::layer::prefetcher::{PrefetchOrchestrator, PrefetchStatus};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control service is not running")]
    Closed,

    #[error("Control request {0} was dropped without a reply")]
    NoReply(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ForceActivate,
    GetCacheSize,
    GetPrefetchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Lifecycle { state: LifecycleState },
    CacheSize { size: String, entries: usize },
    PrefetchStatus(PrefetchStatus),
    Error { error: String },
}

/// Human-readable entry total.
pub fn format_size(entries: usize) -> String {
    match entries {
        1 => "1 entry".to_string(),
        n => format!("{n} entries"),
    }
}

/// One in-flight control request.
#[derive(Debug)]
pub struct Envelope {
    pub id: Uuid,
    pub message: ControlMessage,
    pub reply: oneshot::Sender<ControlReply>,
}

/// Caller side of the channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Envelope>,
}

/// Service side of the channel.
pub type ControlReceiver = mpsc::Receiver<Envelope>;

/// Create a bounded control channel.
pub fn control_channel(capacity: usize) -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ControlHandle { tx }, rx)
}

impl ControlHandle {
    /// Send a message and wait for its reply.
    pub async fn request(&self, message: ControlMessage) -> Result<ControlReply, ControlError> {
        let id = Uuid::new_v4();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { id, message, reply })
            .await
            .map_err(|_| ControlError::Closed)?;
        rx.await.map_err(|_| ControlError::NoReply(id))
    }
}

/// Answers control messages against the live lifecycle, store and prefetcher.
pub struct ControlService {
    lifecycle: Arc<LifecycleController>,
    store: SharedStore,
    prefetcher: Arc<PrefetchOrchestrator>,
}

impl ControlService {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        store: SharedStore,
        prefetcher: Arc<PrefetchOrchestrator>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            prefetcher,
        }
    }

    /// Serve until every handle is dropped. Messages are answered
    /// concurrently, each on its own reply channel.
    pub async fn run(self: Arc<Self>, mut rx: ControlReceiver) {
        while let Some(envelope) = rx.recv().await {
            let service = self.clone();
            tokio::spawn(async move {
                let Envelope { id, message, reply } = envelope;
                debug!(%id, ?message, "Control message received");
                let answer = service.answer(message).await;
                if reply.send(answer).is_err() {
                    debug!(%id, "Control caller went away before the reply");
                }
            });
        }
        debug!("Control channel closed");
    }

    pub async fn answer(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::ForceActivate => {
                info!(state = ?self.lifecycle.state(), "Forced activation requested");
                self.lifecycle.skip_waiting();
                ControlReply::Lifecycle {
                    state: self.lifecycle.state(),
                }
            }
            ControlMessage::GetCacheSize => match self.store.total_entries().await {
                Ok(entries) => ControlReply::CacheSize {
                    size: format_size(entries),
                    entries,
                },
                Err(e) => {
                    warn!(error = %e, "Cache size query failed");
                    ControlReply::Error {
                        error: e.to_string(),
                    }
                }
            },
            ControlMessage::GetPrefetchStatus => {
                ControlReply::PrefetchStatus(self.prefetcher.status().await)
            }
        }
    }
}
