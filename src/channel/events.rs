//! Realtime channel event types.
//!
//! Inbound and outbound events share a flat tagged JSON structure:
//!
//! ```json
//! {
//!     "type": "message:new",
//!     "message": { ... }
//! }
//! ```
//!
//! Each variant carries only the data it needs; serialization is derived in
//! one place rather than hand-built per handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::conversation::ConversationDto;
use crate::models::message::{FileRef, MessageDto};

/// Push events delivered by the realtime transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "message:new")]
    MessageNew { message: MessageDto },

    #[serde(rename = "message:edit")]
    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        text: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "message:delete")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    #[serde(rename = "message:react")]
    ReactionAdded {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "message:unreact")]
    ReactionRemoved {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    #[serde(rename = "typing")]
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    #[serde(rename = "read-receipt")]
    ReadReceipt {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        reader_id: Uuid,
    },

    #[serde(rename = "delivery-receipt")]
    DeliveryReceipt {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        recipient_id: Uuid,
    },

    #[serde(rename = "conversation:created")]
    ConversationCreated { conversation: ConversationDto },

    #[serde(rename = "conversation:deleted")]
    ConversationDeleted { conversation_id: Uuid },
}

impl ChannelEvent {
    /// Event type as the wire string (e.g. "message:new").
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message:new",
            Self::MessageEdited { .. } => "message:edit",
            Self::MessageDeleted { .. } => "message:delete",
            Self::ReactionAdded { .. } => "message:react",
            Self::ReactionRemoved { .. } => "message:unreact",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read-receipt",
            Self::DeliveryReceipt { .. } => "delivery-receipt",
            Self::ConversationCreated { .. } => "conversation:created",
            Self::ConversationDeleted { .. } => "conversation:deleted",
        }
    }

    /// Conversation the event is scoped to.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageNew { message } => message.conversation_id,
            Self::MessageEdited {
                conversation_id, ..
            }
            | Self::MessageDeleted {
                conversation_id, ..
            }
            | Self::ReactionAdded {
                conversation_id, ..
            }
            | Self::ReactionRemoved {
                conversation_id, ..
            }
            | Self::Typing {
                conversation_id, ..
            }
            | Self::ReadReceipt {
                conversation_id, ..
            }
            | Self::DeliveryReceipt {
                conversation_id, ..
            }
            | Self::ConversationDeleted { conversation_id } => *conversation_id,
            Self::ConversationCreated { conversation } => conversation.id,
        }
    }
}

/// Events this client emits to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "message:send")]
    SendMessage {
        temp_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        text: String,
        file: Option<FileRef>,
        reply_to: Option<Uuid>,
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "typing")]
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

/// Server acknowledgment of an emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAck {
    /// Authoritative id assigned by the server (present for message sends).
    pub message_id: Option<Uuid>,
    /// Authoritative creation time, when the server rewrites it.
    pub created_at: Option<DateTime<Utc>>,
}
