use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery lifecycle of a message as seen by this client.
///
/// Forward path is `Sending -> Sent -> Delivered -> Read`; a send that never
/// gets acknowledged lands in `Failed` until a retry re-enters `Sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Monotonic progress rank. `Read` implies `Delivered` implies `Sent`;
    /// `Failed` carries no progress and ranks with `Sending`.
    pub fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Sending | DeliveryStatus::Failed => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Reference to an already-uploaded attachment; byte transfer is not this
/// crate's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated temp id until server-confirmed, then the
    /// authoritative server id.
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub file: Option<FileRef>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub reactions: Vec<Reaction>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// One-line summary for the conversation list.
    pub fn preview_text(&self) -> String {
        match &self.file {
            Some(file) if self.text.trim().is_empty() => format!("[file] {}", file.name),
            _ => self.text.clone(),
        }
    }
}

/// Outgoing content before ids and timestamps are assigned.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub text: String,
    pub file: Option<FileRef>,
    pub reply_to: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Wire shape of a message as the server reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}
