//! In-process event channel.
//!
//! Routes emitted events to a configurable acknowledgment policy and lets
//! the process inject inbound pushes, standing in for the socket transport
//! in tests and offline sessions.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use super::events::{ChannelEvent, EventAck, OutboundEvent};
use super::{EventChannel, InboundEvents};
use crate::error::{AppError, AppResult};

/// How the channel acknowledges emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge immediately, assigning a fresh server id to sends.
    Auto,
    /// Queue acknowledgments until [`LocalChannel::resolve_ack`] is called.
    Manual,
    /// Never acknowledge; emits suspend until the caller's timeout fires.
    Silent,
}

struct Shared {
    connected: bool,
    ack_mode: AckMode,
    rooms: HashSet<Uuid>,
    emitted: Vec<OutboundEvent>,
    pending: Vec<oneshot::Sender<AppResult<EventAck>>>,
}

#[derive(Clone)]
pub struct LocalChannel {
    shared: Arc<RwLock<Shared>>,
    inbound_tx: UnboundedSender<ChannelEvent>,
}

impl LocalChannel {
    pub fn new() -> (Self, InboundEvents) {
        let (inbound_tx, inbound_rx) = unbounded_channel();
        let channel = Self {
            shared: Arc::new(RwLock::new(Shared {
                connected: true,
                ack_mode: AckMode::Auto,
                rooms: HashSet::new(),
                emitted: Vec::new(),
                pending: Vec::new(),
            })),
            inbound_tx,
        };
        (channel, inbound_rx)
    }

    pub async fn set_ack_mode(&self, mode: AckMode) {
        self.shared.write().await.ack_mode = mode;
    }

    /// Flip the connection state. Going down flushes every queued
    /// acknowledgment with a disconnect error so waiting sends fail fast.
    pub async fn set_connected(&self, connected: bool) {
        let mut shared = self.shared.write().await;
        shared.connected = connected;
        if !connected {
            for tx in shared.pending.drain(..) {
                let _ = tx.send(Err(AppError::ChannelDisconnected));
            }
        }
    }

    /// Inject an inbound push, as the server would.
    pub fn push(&self, event: ChannelEvent) {
        let _ = self.inbound_tx.send(event);
    }

    /// Resolve the oldest queued acknowledgment. Returns false when nothing
    /// is waiting.
    pub async fn resolve_ack(&self, result: AppResult<EventAck>) -> bool {
        let mut shared = self.shared.write().await;
        if shared.pending.is_empty() {
            return false;
        }
        let tx = shared.pending.remove(0);
        tx.send(result).is_ok()
    }

    pub async fn emitted(&self) -> Vec<OutboundEvent> {
        self.shared.read().await.emitted.clone()
    }

    pub async fn subscribed_rooms(&self) -> HashSet<Uuid> {
        self.shared.read().await.rooms.clone()
    }
}

#[async_trait]
impl EventChannel for LocalChannel {
    async fn emit(&self, event: OutboundEvent) -> AppResult<EventAck> {
        let waiter = {
            let mut shared = self.shared.write().await;
            if !shared.connected {
                return Err(AppError::ChannelDisconnected);
            }
            shared.emitted.push(event.clone());
            match shared.ack_mode {
                AckMode::Auto => {
                    let message_id = match event {
                        OutboundEvent::SendMessage { .. } => Some(Uuid::new_v4()),
                        OutboundEvent::Typing { .. } => None,
                    };
                    return Ok(EventAck {
                        message_id,
                        created_at: Some(Utc::now()),
                    });
                }
                AckMode::Silent => None,
                AckMode::Manual => {
                    let (tx, rx) = oneshot::channel();
                    shared.pending.push(tx);
                    Some(rx)
                }
            }
        };

        match waiter {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(AppError::Transport("ack sender dropped".into()))),
            None => futures::future::pending::<AppResult<EventAck>>().await,
        }
    }

    async fn subscribe(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut shared = self.shared.write().await;
        if !shared.connected {
            return Err(AppError::ChannelDisconnected);
        }
        shared.rooms.insert(conversation_id);
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: Uuid) -> AppResult<()> {
        self.shared.write().await.rooms.remove(&conversation_id);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.shared.read().await.connected
    }
}
