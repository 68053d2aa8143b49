//! Realtime push transport abstraction.
//!
//! The engine never talks to a socket directly: it emits through
//! [`EventChannel`] and consumes inbound pushes from the receiver handed to
//! it at session start. Room-scoped subscriptions follow the open
//! conversation.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::error::AppResult;

pub mod events;
pub mod local;

pub use events::{ChannelEvent, EventAck, OutboundEvent};
pub use local::{AckMode, LocalChannel};

/// Receiver half for inbound events, handed to the engine at session start.
pub type InboundEvents = UnboundedReceiver<ChannelEvent>;

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Emit an event to the server and wait for its acknowledgment. Callers
    /// bound the wait themselves; the channel may suspend indefinitely.
    async fn emit(&self, event: OutboundEvent) -> AppResult<EventAck>;

    /// Open the room-scoped subscription for a conversation.
    async fn subscribe(&self, conversation_id: Uuid) -> AppResult<()>;

    /// Drop the room-scoped subscription for a conversation.
    async fn unsubscribe(&self, conversation_id: Uuid) -> AppResult<()>;

    /// Whether the transport currently holds a connection.
    async fn is_connected(&self) -> bool;
}
