//! Conversation list state.
//!
//! One record per conversation id, grouped into sections derived from the
//! conversation type. Ordering within a section is most-recent-first and is
//! maintained by `move_to_top`; unread counters are local bookkeeping and
//! never dictated by the server.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::conversation::{Conversation, ConversationDto, MessagePreview, Section};

#[derive(Default)]
struct StoreState {
    conversations: HashMap<Uuid, Conversation>,
    /// Head-first id ordering per section; the map above owns the records.
    order: HashMap<Section, Vec<Uuid>>,
}

impl StoreState {
    fn enlist(&mut self, id: Uuid, section: Section) {
        let order = self.order.entry(section).or_default();
        if !order.contains(&id) {
            order.push(id);
        }
    }

    fn delist(&mut self, id: Uuid, section: Section) {
        if let Some(order) = self.order.get_mut(&section) {
            order.retain(|entry| *entry != id);
        }
    }
}

#[derive(Default, Clone)]
pub struct ConversationStore {
    inner: Arc<RwLock<StoreState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a conversation from a server record. Local unread
    /// count and section position are preserved on refresh; the type is
    /// immutable post-creation and never taken from a refresh.
    pub async fn upsert(&self, dto: ConversationDto) {
        let mut state = self.inner.write().await;
        match state.conversations.get_mut(&dto.id) {
            Some(existing) => {
                existing.name = dto.name;
                if !dto.members.is_empty() {
                    existing.members = dto.members;
                }
                if dto.last_message.is_some() {
                    existing.last_message = dto.last_message;
                }
                if dto.last_message_at.is_some() {
                    existing.last_message_at = dto.last_message_at;
                }
            }
            None => {
                let conversation: Conversation = dto.into();
                let id = conversation.id;
                let section = conversation.section();
                state.conversations.insert(id, conversation);
                state.enlist(id, section);
            }
        }
    }

    pub async fn remove(&self, conversation_id: Uuid) -> bool {
        let mut state = self.inner.write().await;
        let Some(conversation) = state.conversations.remove(&conversation_id) else {
            return false;
        };
        let section = conversation.section();
        state.delist(conversation_id, section);
        true
    }

    /// Atomically update the preview and recency, optionally bump the unread
    /// counter, and relocate the conversation to the head of its section.
    /// Returns false when the conversation is unknown (nothing happens).
    pub async fn move_to_top(
        &self,
        conversation_id: Uuid,
        preview: MessagePreview,
        timestamp: DateTime<Utc>,
        increment_unread: bool,
    ) -> bool {
        let mut state = self.inner.write().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            debug!(%conversation_id, "move_to_top for unknown conversation");
            return false;
        };
        conversation.last_message = Some(preview);
        conversation.last_message_at = Some(timestamp);
        if increment_unread {
            conversation.unread_count += 1;
        }
        let section = conversation.section();
        let order = state.order.entry(section).or_default();
        order.retain(|id| *id != conversation_id);
        order.insert(0, conversation_id);
        true
    }

    /// Reset the unread counter; one reset per open event.
    pub async fn mark_read(&self, conversation_id: Uuid) -> bool {
        let mut state = self.inner.write().await;
        match state.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned()
    }

    pub async fn contains(&self, conversation_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .conversations
            .contains_key(&conversation_id)
    }

    /// Ordered records of one section, head (most recent) first.
    pub async fn section(&self, section: Section) -> Vec<Conversation> {
        let state = self.inner.read().await;
        state
            .order
            .get(&section)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|id| state.conversations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn total_unread(&self) -> u64 {
        self.inner
            .read()
            .await
            .conversations
            .values()
            .map(|c| u64::from(c.unread_count))
            .sum()
    }
}
