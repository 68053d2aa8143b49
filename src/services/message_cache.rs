//! Per-conversation message cache.
//!
//! Ordered by `(created_at, insertion sequence)`, bounded to the most recent
//! N entries, persisted through the storage port on every mutation. Appends
//! are idempotent: a message id already present is replaced in place, never
//! duplicated. Authoritative refills merge instead of shrinking so a stale
//! snapshot can never erase newer local or pushed state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::message::{DeliveryStatus, Message, Reaction};
use crate::storage::{messages_key, Storage};

/// One cached message plus the local tie-break sequence assigned at append.
#[derive(Debug, Clone)]
struct Slot {
    message: Message,
    seq: u64,
}

#[derive(Default)]
struct Slice {
    slots: Vec<Slot>,
    next_seq: u64,
}

impl Slice {
    fn index_of(&self, id: Uuid) -> Option<usize> {
        self.slots.iter().position(|s| s.message.id == id)
    }

    fn insert_sorted(&mut self, slot: Slot) {
        let key = (slot.message.created_at, slot.seq);
        let pos = self
            .slots
            .partition_point(|s| (s.message.created_at, s.seq) <= key);
        self.slots.insert(pos, slot);
    }

    fn resort(&mut self) {
        self.slots.sort_by_key(|s| (s.message.created_at, s.seq));
    }

    fn stage(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(Slot { message, seq });
    }
}

#[derive(Clone)]
pub struct MessageCache {
    inner: Arc<RwLock<HashMap<Uuid, Slice>>>,
    storage: Arc<dyn Storage>,
    capacity: usize,
}

impl MessageCache {
    pub fn new(storage: Arc<dyn Storage>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            storage,
            capacity,
        }
    }

    /// Idempotent append. A message whose id is already cached replaces the
    /// existing entry in place, keeping its insertion sequence so timestamp
    /// tie-breaks stay stable; a new id is inserted in order and the oldest
    /// entries are evicted beyond capacity. Returns true when a new entry
    /// was inserted (as opposed to replaced).
    pub async fn append(&self, conversation_id: Uuid, message: Message) -> bool {
        let (snapshot, inserted) = {
            let mut map = self.inner.write().await;
            let slice = map.entry(conversation_id).or_default();
            let inserted = match slice.index_of(message.id) {
                Some(idx) => {
                    let resort = slice.slots[idx].message.created_at != message.created_at;
                    slice.slots[idx].message = message;
                    if resort {
                        slice.resort();
                    }
                    false
                }
                None => {
                    let seq = slice.next_seq;
                    slice.next_seq += 1;
                    slice.insert_sorted(Slot { message, seq });
                    Self::evict(slice, self.capacity);
                    true
                }
            };
            (Self::snapshot(slice), inserted)
        };
        self.persist(conversation_id, snapshot).await;
        inserted
    }

    /// Reconcile a cached entry to its authoritative identity in place: the
    /// optimistic record takes the server's id, fields and timestamp. When
    /// the authoritative id is already cached (the push beat the ack), the
    /// stale optimistic slot is dropped instead of duplicated. Returns false
    /// when `old_id` is not cached.
    pub async fn rebind(&self, conversation_id: Uuid, old_id: Uuid, message: Message) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(old_id) else {
                return false;
            };
            if message.id != old_id && slice.index_of(message.id).is_some() {
                slice.slots.remove(idx);
            } else {
                slice.slots[idx].message = message;
            }
            slice.resort();
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    /// Authoritative refill. A snapshot at least as long as the local slice
    /// replaces it (retaining further-advanced delivery statuses and local
    /// in-flight sends); a shorter snapshot means recent pushes have not
    /// reached the fetch yet, so the slices are unioned by id instead of
    /// shrinking the cache.
    pub async fn replace_all(&self, conversation_id: Uuid, incoming: Vec<Message>) {
        let snapshot = {
            let mut map = self.inner.write().await;
            let slice = map.entry(conversation_id).or_default();
            if incoming.len() >= slice.slots.len() {
                Self::replace_slice(slice, incoming);
            } else {
                Self::merge_slice(slice, incoming);
            }
            Self::evict(slice, self.capacity);
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
    }

    fn replace_slice(slice: &mut Slice, incoming: Vec<Message>) {
        let mut prior: HashMap<Uuid, Message> = slice
            .slots
            .drain(..)
            .map(|s| (s.message.id, s.message))
            .collect();
        let mut seen: HashSet<Uuid> = HashSet::new();
        for mut message in incoming {
            if !seen.insert(message.id) {
                continue;
            }
            if let Some(old) = prior.remove(&message.id) {
                if old.status.rank() > message.status.rank() {
                    message.status = old.status;
                }
            }
            slice.stage(message);
        }
        // Local in-flight sends are invisible to the snapshot; keep them.
        for message in prior.into_values() {
            if matches!(
                message.status,
                DeliveryStatus::Sending | DeliveryStatus::Failed
            ) {
                slice.stage(message);
            }
        }
        slice.resort();
    }

    fn merge_slice(slice: &mut Slice, incoming: Vec<Message>) {
        for message in incoming {
            match slice.index_of(message.id) {
                Some(idx) => {
                    let slot = &mut slice.slots[idx];
                    let status = if slot.message.status.rank() > message.status.rank() {
                        slot.message.status
                    } else {
                        message.status
                    };
                    slot.message = Message { status, ..message };
                }
                None => slice.stage(message),
            }
        }
        slice.resort();
    }

    pub async fn set_status(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(message_id) else {
                return false;
            };
            if slice.slots[idx].message.status == status {
                return true;
            }
            slice.slots[idx].message.status = status;
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    pub async fn apply_edit(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        text: String,
        edited_at: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(message_id) else {
                return false;
            };
            let message = &mut slice.slots[idx].message;
            message.text = text;
            message.edited = true;
            message.edited_at = Some(edited_at);
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    /// Set-semantics reaction add: a (user, emoji) pair already present is
    /// left alone.
    pub async fn add_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        reaction: Reaction,
    ) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(message_id) else {
                return false;
            };
            let message = &mut slice.slots[idx].message;
            if message.reactions.contains(&reaction) {
                return true;
            }
            message.reactions.push(reaction);
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    pub async fn remove_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(message_id) else {
                return false;
            };
            let message = &mut slice.slots[idx].message;
            let before = message.reactions.len();
            message
                .reactions
                .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
            if message.reactions.len() == before {
                return true;
            }
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    pub async fn remove(&self, conversation_id: Uuid, message_id: Uuid) -> bool {
        let snapshot = {
            let mut map = self.inner.write().await;
            let Some(slice) = map.get_mut(&conversation_id) else {
                return false;
            };
            let Some(idx) = slice.index_of(message_id) else {
                return false;
            };
            slice.slots.remove(idx);
            Self::snapshot(slice)
        };
        self.persist(conversation_id, snapshot).await;
        true
    }

    /// Ordered snapshot of a conversation's cached messages.
    pub async fn get_all(&self, conversation_id: Uuid) -> Vec<Message> {
        self.inner
            .read()
            .await
            .get(&conversation_id)
            .map(Self::snapshot)
            .unwrap_or_default()
    }

    pub async fn find(&self, conversation_id: Uuid, message_id: Uuid) -> Option<Message> {
        let map = self.inner.read().await;
        let slice = map.get(&conversation_id)?;
        let idx = slice.index_of(message_id)?;
        Some(slice.slots[idx].message.clone())
    }

    pub async fn len(&self, conversation_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, |s| s.slots.len())
    }

    pub async fn is_empty(&self, conversation_id: Uuid) -> bool {
        self.len(conversation_id).await == 0
    }

    pub async fn conversation_ids(&self) -> Vec<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }

    /// Reload the persisted slice unless something is already cached (the
    /// in-memory state is always at least as new as the persisted one).
    /// Sends still marked in-flight by a previous session can never be
    /// acknowledged now and come back as failed, retriable entries.
    pub async fn hydrate(&self, conversation_id: Uuid) -> AppResult<usize> {
        {
            let map = self.inner.read().await;
            if let Some(slice) = map.get(&conversation_id) {
                if !slice.slots.is_empty() {
                    return Ok(slice.slots.len());
                }
            }
        }

        let Some(raw) = self.storage.get(&messages_key(conversation_id)).await? else {
            return Ok(0);
        };
        let messages: Vec<Message> = serde_json::from_str(&raw)?;

        let mut map = self.inner.write().await;
        let slice = map.entry(conversation_id).or_default();
        if !slice.slots.is_empty() {
            return Ok(slice.slots.len());
        }
        for mut message in messages {
            if message.status == DeliveryStatus::Sending {
                message.status = DeliveryStatus::Failed;
            }
            slice.stage(message);
        }
        slice.resort();
        Self::evict(slice, self.capacity);
        Ok(slice.slots.len())
    }

    /// Drop a conversation's slice entirely, in memory and in storage.
    pub async fn clear(&self, conversation_id: Uuid) {
        self.inner.write().await.remove(&conversation_id);
        if let Err(err) = self.storage.clear(&messages_key(conversation_id)).await {
            warn!(%conversation_id, error = %err, "failed to clear persisted messages");
        }
    }

    fn evict(slice: &mut Slice, capacity: usize) {
        while slice.slots.len() > capacity {
            slice.slots.remove(0);
        }
    }

    fn snapshot(slice: &Slice) -> Vec<Message> {
        slice.slots.iter().map(|s| s.message.clone()).collect()
    }

    async fn persist(&self, conversation_id: Uuid, messages: Vec<Message>) {
        let payload = match serde_json::to_string(&messages) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%conversation_id, error = %err, "failed to serialize message slice");
                return;
            }
        };
        if let Err(err) = self
            .storage
            .set(&messages_key(conversation_id), payload)
            .await
        {
            warn!(%conversation_id, error = %err, "failed to persist message slice");
        }
    }
}
