//! Session lifecycle.
//!
//! One [`ClientSession`] per signed-in user: created at login, torn down at
//! logout. Everything the engine needs — transport, API, storage — is
//! injected here; nothing lives in module-level globals.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::{EventChannel, InboundEvents};
use crate::config::Config;
use crate::error::AppResult;
use crate::services::api_client::ChatApi;
use crate::services::conversation_store::ConversationStore;
use crate::services::delivery_tracker::DeliveryTracker;
use crate::services::message_cache::MessageCache;
use crate::services::sync_engine::SyncEngine;
use crate::storage::Storage;

pub struct ClientSession {
    pub config: Arc<Config>,
    pub engine: Arc<SyncEngine>,
}

impl ClientSession {
    /// Wire up the stores and engine, start the inbound pump, and load the
    /// initial conversation list. A failed bootstrap does not block the
    /// session: the client runs from persisted state until connectivity
    /// returns.
    pub async fn start(
        config: Config,
        user_id: Uuid,
        channel: Arc<dyn EventChannel>,
        api: Arc<dyn ChatApi>,
        storage: Arc<dyn Storage>,
        inbound: InboundEvents,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let cache = MessageCache::new(Arc::clone(&storage), config.cache_capacity);
        let tracker = DeliveryTracker::new(storage);
        let conversations = ConversationStore::new();
        let engine = SyncEngine::new(
            Arc::clone(&config),
            user_id,
            cache,
            tracker,
            conversations,
            channel,
            api,
        );

        engine.start(inbound).await;
        if let Err(err) = engine.bootstrap().await {
            warn!(error = %err, "bootstrap failed, continuing from persisted state");
        }

        info!(%user_id, "messaging session started");
        Ok(Self { config, engine })
    }

    /// Tear the session down: leave the open room and stop the engine's
    /// background work.
    pub async fn logout(self) -> AppResult<()> {
        self.engine.close_conversation().await;
        self.engine.shutdown().await;
        info!("messaging session closed");
        Ok(())
    }
}
