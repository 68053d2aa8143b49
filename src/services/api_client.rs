//! REST collaborator surface.
//!
//! The engine treats the backend's request/response API as a set of plain
//! async functions returning DTOs; wire concerns (HTTP, auth headers,
//! retries) live behind the implementation. Message creation is not here:
//! sends go over the realtime channel and are confirmed by its
//! acknowledgment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::conversation::ConversationDto;
use crate::models::message::MessageDto;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// All conversations for the signed-in user, most recent first.
    async fn list_conversations(&self) -> AppResult<Vec<ConversationDto>>;

    /// One page of a conversation's history, oldest first.
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        skip: usize,
    ) -> AppResult<Vec<MessageDto>>;

    /// Replace a message's text.
    async fn update_message(&self, message_id: Uuid, text: &str) -> AppResult<()>;

    async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> AppResult<()>;

    async fn remove_reaction(&self, message_id: Uuid, emoji: &str) -> AppResult<()>;

    /// Report the read boundary for a conversation.
    async fn mark_read(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;
}
