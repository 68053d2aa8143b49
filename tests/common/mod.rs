#![allow(dead_code)]

//! Shared harness for the scenario tests: an in-process channel, a scripted
//! REST double and in-memory storage wired into a full client session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use messaging_client::channel::LocalChannel;
use messaging_client::config::Config;
use messaging_client::error::AppResult;
use messaging_client::models::conversation::{ConversationDto, ConversationType};
use messaging_client::models::message::MessageDto;
use messaging_client::services::api_client::ChatApi;
use messaging_client::state::ClientSession;
use messaging_client::storage::MemoryStorage;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Scripted REST double: returns what the test seeded and records what the
/// engine asked for.
#[derive(Default)]
pub struct ScriptedApi {
    pub conversations: RwLock<Vec<ConversationDto>>,
    pub messages: RwLock<HashMap<Uuid, Vec<MessageDto>>>,
    pub fetch_calls: Mutex<Vec<Uuid>>,
    pub read_calls: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    pub edit_calls: Mutex<Vec<(Uuid, String)>>,
    pub reaction_calls: Mutex<Vec<(Uuid, String, bool)>>,
}

impl ScriptedApi {
    pub async fn seed_conversation(&self, dto: ConversationDto) {
        self.conversations.write().await.push(dto);
    }

    pub async fn seed_messages(&self, conversation_id: Uuid, messages: Vec<MessageDto>) {
        self.messages.write().await.insert(conversation_id, messages);
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn list_conversations(&self) -> AppResult<Vec<ConversationDto>> {
        Ok(self.conversations.read().await.clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        skip: usize,
    ) -> AppResult<Vec<MessageDto>> {
        self.fetch_calls.lock().await.push(conversation_id);
        let all = self
            .messages
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    async fn update_message(&self, message_id: Uuid, text: &str) -> AppResult<()> {
        self.edit_calls
            .lock()
            .await
            .push((message_id, text.to_string()));
        Ok(())
    }

    async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> AppResult<()> {
        self.reaction_calls
            .lock()
            .await
            .push((message_id, emoji.to_string(), true));
        Ok(())
    }

    async fn remove_reaction(&self, message_id: Uuid, emoji: &str) -> AppResult<()> {
        self.reaction_calls
            .lock()
            .await
            .push((message_id, emoji.to_string(), false));
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        self.read_calls.lock().await.push((conversation_id, at));
        Ok(())
    }
}

pub struct Harness {
    pub session: ClientSession,
    pub channel: LocalChannel,
    pub api: Arc<ScriptedApi>,
    pub storage: MemoryStorage,
    pub user_id: Uuid,
}

/// Tight timings so failure paths settle quickly in tests.
pub fn fast_config() -> Config {
    Config {
        cache_capacity: 50,
        ack_timeout: Duration::from_millis(200),
        echo_grace: Duration::from_secs(10),
        resync_debounce: Duration::from_millis(25),
        storage_dir: None,
    }
}

pub async fn start_harness() -> Harness {
    start_harness_for(
        fast_config(),
        Uuid::new_v4(),
        Arc::new(ScriptedApi::default()),
        MemoryStorage::new(),
    )
    .await
}

pub async fn start_harness_for(
    config: Config,
    user_id: Uuid,
    api: Arc<ScriptedApi>,
    storage: MemoryStorage,
) -> Harness {
    init_tracing();
    let (channel, inbound) = LocalChannel::new();
    let api_dyn: Arc<dyn ChatApi> = api.clone();
    let session = ClientSession::start(
        config,
        user_id,
        Arc::new(channel.clone()),
        api_dyn,
        Arc::new(storage.clone()),
        inbound,
    )
    .await
    .expect("session start");
    Harness {
        session,
        channel,
        api,
        storage,
        user_id,
    }
}

pub fn direct_dto(members: Vec<Uuid>) -> ConversationDto {
    ConversationDto {
        id: Uuid::new_v4(),
        kind: ConversationType::Direct,
        name: None,
        members,
        last_message: None,
        last_message_at: None,
    }
}

pub fn inbound_dto(conversation_id: Uuid, sender_id: Uuid, text: &str) -> MessageDto {
    MessageDto {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        text: text.into(),
        file: None,
        reply_to: None,
        created_at: Utc::now(),
        reactions: vec![],
        edited: false,
        edited_at: None,
    }
}
