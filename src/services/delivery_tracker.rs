//! Per-message delivery status tracking.
//!
//! Statuses only move forward: `Sending -> Sent -> Delivered -> Read`, with
//! `Sending -> Failed` as the unacknowledged branch. Once a send is
//! acknowledged the client temp id and the server id both resolve to the
//! same entry through a bidirectional alias table. The status map is
//! persisted so a restarted session keeps what it already knew.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::message::DeliveryStatus;
use crate::storage::{delivery_key, Storage};

/// Tracked state for one logical message. `temp_id` is the canonical key;
/// for foreign messages it is simply the server id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEntry {
    pub temp_id: Uuid,
    pub server_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub delivered_to: Vec<Uuid>,
    pub read_by: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryEntry {
    fn new(temp_id: Uuid, status: DeliveryStatus) -> Self {
        Self {
            temp_id,
            server_id: None,
            status,
            error: None,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct TrackerState {
    entries: HashMap<Uuid, DeliveryEntry>,
    /// server id -> canonical (temp) id
    aliases: HashMap<Uuid, Uuid>,
}

impl TrackerState {
    fn resolve(&self, id: Uuid) -> Uuid {
        *self.aliases.get(&id).unwrap_or(&id)
    }
}

#[derive(Clone)]
pub struct DeliveryTracker {
    inner: Arc<RwLock<TrackerState>>,
    storage: Arc<dyn Storage>,
}

impl DeliveryTracker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerState::default())),
            storage,
        }
    }

    /// Initial state of a local send. Also the retry entry point: a failed
    /// entry re-enters `Sending` with the same temp id, clearing its error.
    pub async fn mark_sending(&self, temp_id: Uuid) {
        {
            let mut state = self.inner.write().await;
            let entry = state
                .entries
                .entry(temp_id)
                .or_insert_with(|| DeliveryEntry::new(temp_id, DeliveryStatus::Sending));
            match entry.status {
                DeliveryStatus::Sending => {}
                DeliveryStatus::Failed => {
                    entry.status = DeliveryStatus::Sending;
                    entry.error = None;
                    entry.updated_at = Utc::now();
                }
                other => {
                    debug!(%temp_id, status = ?other, "ignoring mark_sending on settled entry");
                }
            }
        }
        self.persist().await;
    }

    /// Bind the server id to the pending entry and advance it to `Sent`.
    /// Both ids resolve to the entry afterwards. A failed entry stays
    /// failed: a late acknowledgment does not resurrect it.
    pub async fn mark_sent(&self, temp_id: Uuid, server_id: Uuid) -> bool {
        let changed = {
            let mut state = self.inner.write().await;
            let key = state.resolve(temp_id);
            let Some(entry) = state.entries.get_mut(&key) else {
                return false;
            };
            if entry.status == DeliveryStatus::Failed {
                debug!(%temp_id, %server_id, "late ack for failed send, ignoring");
                return false;
            }
            entry.server_id = Some(server_id);
            let changed = entry.status.rank() < DeliveryStatus::Sent.rank();
            if changed {
                entry.status = DeliveryStatus::Sent;
                entry.updated_at = Utc::now();
            }
            state.aliases.insert(server_id, key);
            changed
        };
        self.persist().await;
        changed
    }

    pub async fn mark_delivered(&self, server_id: Uuid, recipients: &[Uuid]) -> bool {
        self.advance(server_id, DeliveryStatus::Delivered, recipients, &[])
            .await
    }

    /// Idempotent: marking an already-read entry again is a no-op.
    pub async fn mark_read(&self, server_id: Uuid, readers: &[Uuid]) -> bool {
        self.advance(server_id, DeliveryStatus::Read, &[], readers)
            .await
    }

    /// Only an unacknowledged send can fail; any settled state wins over a
    /// late timeout.
    pub async fn mark_failed(&self, temp_id: Uuid, error: &str) -> bool {
        let changed = {
            let mut state = self.inner.write().await;
            let key = state.resolve(temp_id);
            let Some(entry) = state.entries.get_mut(&key) else {
                return false;
            };
            if entry.status != DeliveryStatus::Sending {
                debug!(%temp_id, status = ?entry.status, "ignoring mark_failed on settled entry");
                return false;
            }
            entry.status = DeliveryStatus::Failed;
            entry.error = Some(error.to_string());
            entry.updated_at = Utc::now();
            true
        };
        if changed {
            self.persist().await;
        }
        changed
    }

    /// Register a foreign inbound message at its initial status so later
    /// receipts and read sweeps have an entry to advance.
    pub async fn observe(&self, server_id: Uuid, status: DeliveryStatus) {
        {
            let mut state = self.inner.write().await;
            let key = state.resolve(server_id);
            let entry = state
                .entries
                .entry(key)
                .or_insert_with(|| DeliveryEntry::new(key, status));
            if entry.status.rank() < status.rank() {
                entry.status = status;
                entry.updated_at = Utc::now();
            }
        }
        self.persist().await;
    }

    pub async fn status_of(&self, id: Uuid) -> Option<DeliveryStatus> {
        let state = self.inner.read().await;
        let key = state.resolve(id);
        state.entries.get(&key).map(|e| e.status)
    }

    pub async fn entry(&self, id: Uuid) -> Option<DeliveryEntry> {
        let state = self.inner.read().await;
        let key = state.resolve(id);
        state.entries.get(&key).cloned()
    }

    /// Reload the persisted map unless entries already exist. In-flight
    /// sends from the previous session come back failed: their
    /// acknowledgments are gone for good.
    pub async fn hydrate(&self) -> AppResult<usize> {
        {
            let state = self.inner.read().await;
            if !state.entries.is_empty() {
                return Ok(state.entries.len());
            }
        }
        let Some(raw) = self.storage.get(&delivery_key()).await? else {
            return Ok(0);
        };
        let mut loaded: TrackerState = serde_json::from_str(&raw)?;
        for entry in loaded.entries.values_mut() {
            if entry.status == DeliveryStatus::Sending {
                entry.status = DeliveryStatus::Failed;
                entry.error = Some("session ended before acknowledgment".into());
            }
        }
        let mut state = self.inner.write().await;
        if state.entries.is_empty() {
            *state = loaded;
        }
        Ok(state.entries.len())
    }

    async fn advance(
        &self,
        id: Uuid,
        to: DeliveryStatus,
        recipients: &[Uuid],
        readers: &[Uuid],
    ) -> bool {
        let changed = {
            let mut state = self.inner.write().await;
            let key = state.resolve(id);
            let Some(entry) = state.entries.get_mut(&key) else {
                return false;
            };
            if entry.status == DeliveryStatus::Failed {
                return false;
            }
            let mut changed = false;
            for recipient in recipients {
                if !entry.delivered_to.contains(recipient) {
                    entry.delivered_to.push(*recipient);
                    changed = true;
                }
            }
            for reader in readers {
                if !entry.read_by.contains(reader) {
                    entry.read_by.push(*reader);
                    changed = true;
                }
            }
            if entry.status.rank() < to.rank() {
                entry.status = to;
                changed = true;
            }
            if changed {
                entry.updated_at = Utc::now();
            }
            changed
        };
        if changed {
            self.persist().await;
        }
        changed
    }

    async fn persist(&self) {
        let payload = {
            let state = self.inner.read().await;
            match serde_json::to_string(&*state) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize delivery status map");
                    return;
                }
            }
        };
        if let Err(err) = self.storage.set(&delivery_key(), payload).await {
            warn!(error = %err, "failed to persist delivery status map");
        }
    }
}
