use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Direct,
    Group,
    Broadcast,
}

impl ConversationType {
    pub fn from_str(value: &str) -> Self {
        match value {
            "group" => ConversationType::Group,
            "broadcast" => ConversationType::Broadcast,
            _ => ConversationType::Direct,
        }
    }

    /// Section bucket a conversation of this type lists under. Derived, not
    /// stored: a conversation's type cannot change post-creation.
    pub fn section(self) -> Section {
        match self {
            ConversationType::Direct => Section::Direct,
            ConversationType::Group => Section::Groups,
            ConversationType::Broadcast => Section::Broadcasts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Direct,
    Groups,
    Broadcasts,
}

/// Last-message summary shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub text: String,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationType,
    pub name: Option<String>,
    pub members: Vec<Uuid>,
    pub last_message: Option<MessagePreview>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Inbound messages received while the conversation was not open.
    /// Maintained locally; the server never dictates it.
    pub unread_count: u32,
}

impl Conversation {
    pub fn section(&self) -> Section {
        self.kind.section()
    }
}

/// Wire shape of a conversation as the server reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: Uuid,
    pub kind: ConversationType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl From<ConversationDto> for Conversation {
    fn from(dto: ConversationDto) -> Self {
        Self {
            id: dto.id,
            kind: dto.kind,
            name: dto.name,
            members: dto.members,
            last_message: dto.last_message,
            last_message_at: dto.last_message_at,
            unread_count: 0,
        }
    }
}
