//! Conversation synchronization engine.
//!
//! Sole writer of the three stores. Outbound: optimistic sends that are
//! visible before the server confirms them, with a bounded acknowledgment
//! wait and manual retry on failure. Inbound: push events reconciled
//! idempotently against the optimistic state, unread bookkeeping, and a
//! debounced defensive resync that corrects drift from missed or reordered
//! pushes. The UI observes the stores through a broadcast update stream.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelEvent, EventChannel, InboundEvents, OutboundEvent};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::conversation::MessagePreview;
use crate::models::message::{DeliveryStatus, Message, MessageDraft, MessageDto, Reaction};

use super::api_client::ChatApi;
use super::conversation_store::ConversationStore;
use super::delivery_tracker::DeliveryTracker;
use super::message_cache::MessageCache;

/// Store change notifications for UI subscribers.
#[derive(Debug, Clone)]
pub enum SyncUpdate {
    Messages { conversation_id: Uuid },
    Conversations,
    Delivery { message_id: Uuid },
    Typing { conversation_id: Uuid, user_id: Uuid },
}

pub struct SyncEngine {
    config: Arc<Config>,
    user_id: Uuid,
    cache: MessageCache,
    tracker: DeliveryTracker,
    conversations: ConversationStore,
    channel: Arc<dyn EventChannel>,
    api: Arc<dyn ChatApi>,
    open_conversation: RwLock<Option<Uuid>>,
    resync_timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    updates: broadcast::Sender<SyncUpdate>,
    handle: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        user_id: Uuid,
        cache: MessageCache,
        tracker: DeliveryTracker,
        conversations: ConversationStore,
        channel: Arc<dyn EventChannel>,
        api: Arc<dyn ChatApi>,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(256);
        Arc::new_cyclic(|handle| Self {
            config,
            user_id,
            cache,
            tracker,
            conversations,
            channel,
            api,
            open_conversation: RwLock::new(None),
            resync_timers: Mutex::new(HashMap::new()),
            pump: Mutex::new(None),
            updates,
            handle: handle.clone(),
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.updates.subscribe()
    }

    /// Spawn the inbound pump consuming push events until the channel side
    /// closes or the engine shuts down.
    pub async fn start(&self, mut inbound: InboundEvents) {
        let Some(engine) = self.handle.upgrade() else {
            return;
        };
        let pump = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                engine.dispatch(event).await;
            }
            debug!("inbound event stream closed");
        });
        let mut slot = self.pump.lock().await;
        if let Some(previous) = slot.replace(pump) {
            previous.abort();
        }
    }

    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        for (_, timer) in self.resync_timers.lock().await.drain() {
            timer.abort();
        }
        info!("sync engine stopped");
    }

    /// Rehydrate persisted delivery state and fetch the conversation list.
    pub async fn bootstrap(&self) -> AppResult<()> {
        if let Err(err) = self.tracker.hydrate().await {
            warn!(error = %err, "could not rehydrate delivery state");
        }
        self.refresh_conversations().await
    }

    // ========================================================================
    // Outbound path
    // ========================================================================

    /// Optimistic send. The message is cached and visible immediately; the
    /// call then suspends on the acknowledgment wait and settles the entry
    /// to `Sent` or `Failed`. Returns the temp id for retries.
    pub async fn send(&self, conversation_id: Uuid, draft: MessageDraft) -> AppResult<Uuid> {
        if draft.text.trim().is_empty() && draft.file.is_none() {
            return Err(AppError::Validation("message has no content".into()));
        }

        let temp_id = Uuid::new_v4();
        let message = Message {
            id: temp_id,
            conversation_id,
            sender_id: self.user_id,
            text: draft.text,
            file: draft.file,
            reply_to: draft.reply_to,
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            reactions: Vec::new(),
            edited: false,
            edited_at: None,
        };

        self.cache.append(conversation_id, message.clone()).await;
        self.tracker.mark_sending(temp_id).await;
        self.conversations
            .move_to_top(conversation_id, preview_of(&message), message.created_at, false)
            .await;
        self.notify(SyncUpdate::Messages { conversation_id });
        self.notify(SyncUpdate::Conversations);

        self.dispatch_send(message).await;
        Ok(temp_id)
    }

    /// Re-enter the pipeline for a failed send, reusing the original temp id
    /// and content.
    pub async fn retry(&self, conversation_id: Uuid, temp_id: Uuid) -> AppResult<()> {
        let Some(mut message) = self.cache.find(conversation_id, temp_id).await else {
            return Err(AppError::NotFound(format!("message {temp_id}")));
        };
        if self.tracker.status_of(temp_id).await != Some(DeliveryStatus::Failed) {
            return Err(AppError::Validation(
                "only failed sends can be retried".into(),
            ));
        }

        self.tracker.mark_sending(temp_id).await;
        self.cache
            .set_status(conversation_id, temp_id, DeliveryStatus::Sending)
            .await;
        self.notify(SyncUpdate::Messages { conversation_id });

        message.status = DeliveryStatus::Sending;
        self.dispatch_send(message).await;
        Ok(())
    }

    /// Emit and wait for the acknowledgment under the configured bound;
    /// failures settle on the tracker instead of propagating.
    async fn dispatch_send(&self, message: Message) {
        let conversation_id = message.conversation_id;
        let temp_id = message.id;
        let event = OutboundEvent::SendMessage {
            temp_id,
            conversation_id,
            sender_id: message.sender_id,
            text: message.text,
            file: message.file,
            reply_to: message.reply_to,
            created_at: message.created_at,
        };

        match timeout(self.config.ack_timeout, self.channel.emit(event)).await {
            Ok(Ok(ack)) => match ack.message_id {
                Some(server_id) => {
                    self.confirm_sent(conversation_id, temp_id, server_id, ack.created_at)
                        .await;
                }
                None => {
                    warn!(%temp_id, "acknowledgment carried no message id");
                    self.fail_send(conversation_id, temp_id, "acknowledgment without id")
                        .await;
                }
            },
            Ok(Err(err)) => {
                warn!(%temp_id, error = %err, "send failed");
                self.fail_send(conversation_id, temp_id, &err.to_string())
                    .await;
            }
            Err(_) => {
                let err = AppError::AckTimeout(self.config.ack_timeout);
                warn!(%temp_id, error = %err, "send not acknowledged in time");
                self.fail_send(conversation_id, temp_id, &err.to_string())
                    .await;
            }
        }
    }

    async fn confirm_sent(
        &self,
        conversation_id: Uuid,
        temp_id: Uuid,
        server_id: Uuid,
        created_at: Option<DateTime<Utc>>,
    ) {
        // A timeout may have settled the entry while the ack was in flight.
        if self.tracker.status_of(temp_id).await == Some(DeliveryStatus::Failed) {
            debug!(%temp_id, %server_id, "dropping late ack for failed send");
            return;
        }
        self.tracker.mark_sent(temp_id, server_id).await;

        if let Some(mut message) = self.cache.find(conversation_id, temp_id).await {
            message.id = server_id;
            if let Some(at) = created_at {
                message.created_at = at;
            }
            if message.status.rank() < DeliveryStatus::Sent.rank() {
                message.status = DeliveryStatus::Sent;
            }
            self.cache.rebind(conversation_id, temp_id, message).await;
        } else if let Some(status) = self.tracker.status_of(server_id).await {
            // The push echo already reconciled the entry; align its status.
            self.cache
                .set_status(conversation_id, server_id, status)
                .await;
        }
        self.notify(SyncUpdate::Delivery {
            message_id: server_id,
        });
        self.notify(SyncUpdate::Messages { conversation_id });
    }

    async fn fail_send(&self, conversation_id: Uuid, temp_id: Uuid, reason: &str) {
        // Only an entry still waiting can fail; an ack that won the race wins.
        if self.tracker.mark_failed(temp_id, reason).await {
            self.cache
                .set_status(conversation_id, temp_id, DeliveryStatus::Failed)
                .await;
            self.notify(SyncUpdate::Delivery {
                message_id: temp_id,
            });
            self.notify(SyncUpdate::Messages { conversation_id });
        }
    }

    // ========================================================================
    // Inbound path
    // ========================================================================

    /// Route one push event. Every handler is idempotent: duplicate or
    /// reordered pushes must not corrupt state.
    pub async fn dispatch(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::MessageNew { message } => self.on_inbound_message(message).await,
            ChannelEvent::MessageEdited {
                conversation_id,
                message_id,
                text,
                edited_at,
            } => {
                if self
                    .cache
                    .apply_edit(conversation_id, message_id, text, edited_at)
                    .await
                {
                    self.notify(SyncUpdate::Messages { conversation_id });
                }
            }
            ChannelEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => {
                if self.cache.remove(conversation_id, message_id).await {
                    self.notify(SyncUpdate::Messages { conversation_id });
                }
            }
            ChannelEvent::ReactionAdded {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => {
                let reaction = Reaction { user_id, emoji };
                if self
                    .cache
                    .add_reaction(conversation_id, message_id, reaction)
                    .await
                {
                    self.notify(SyncUpdate::Messages { conversation_id });
                }
            }
            ChannelEvent::ReactionRemoved {
                conversation_id,
                message_id,
                user_id,
                emoji,
            } => {
                if self
                    .cache
                    .remove_reaction(conversation_id, message_id, user_id, &emoji)
                    .await
                {
                    self.notify(SyncUpdate::Messages { conversation_id });
                }
            }
            ChannelEvent::Typing {
                conversation_id,
                user_id,
            } => {
                if user_id != self.user_id {
                    self.notify(SyncUpdate::Typing {
                        conversation_id,
                        user_id,
                    });
                }
            }
            ChannelEvent::ReadReceipt {
                conversation_id,
                message_ids,
                reader_id,
            } => {
                self.on_receipt(conversation_id, message_ids, reader_id, DeliveryStatus::Read)
                    .await;
            }
            ChannelEvent::DeliveryReceipt {
                conversation_id,
                message_ids,
                recipient_id,
            } => {
                self.on_receipt(
                    conversation_id,
                    message_ids,
                    recipient_id,
                    DeliveryStatus::Delivered,
                )
                .await;
            }
            ChannelEvent::ConversationCreated { conversation } => {
                self.conversations.upsert(conversation).await;
                self.notify(SyncUpdate::Conversations);
            }
            ChannelEvent::ConversationDeleted { conversation_id } => {
                self.conversations.remove(conversation_id).await;
                self.cache.clear(conversation_id).await;
                self.notify(SyncUpdate::Conversations);
                self.notify(SyncUpdate::Messages { conversation_id });
            }
        }
    }

    /// New-message push: reconcile self-echoes by replacement, append
    /// everything else idempotently, keep the conversation list current, and
    /// schedule the defensive resync.
    pub async fn on_inbound_message(&self, dto: MessageDto) {
        let conversation_id = dto.conversation_id;
        let open = *self.open_conversation.read().await == Some(conversation_id);
        let foreign = dto.sender_id != self.user_id;

        let mut inserted = false;
        match self.find_pending_echo(&dto).await {
            Some(temp_id) => {
                // Server echo of our optimistic send: dedup by replacement.
                let status = self
                    .tracker
                    .status_of(dto.id)
                    .await
                    .filter(|s| s.rank() > DeliveryStatus::Sent.rank())
                    .unwrap_or(DeliveryStatus::Sent);
                let message = build_message(&dto, status);
                self.cache.rebind(conversation_id, temp_id, message).await;
                self.tracker.mark_sent(temp_id, dto.id).await;
                self.notify(SyncUpdate::Delivery { message_id: dto.id });
            }
            None => {
                let status = if foreign {
                    DeliveryStatus::Delivered
                } else {
                    self.tracker
                        .status_of(dto.id)
                        .await
                        .unwrap_or(DeliveryStatus::Sent)
                };
                let message = build_message(&dto, status);
                inserted = self.cache.append(conversation_id, message).await;
                if foreign {
                    self.tracker
                        .observe(dto.id, DeliveryStatus::Delivered)
                        .await;
                }
            }
        }

        // Preview and recency always update; unread only for a foreign
        // message that is genuinely new and lands off screen (a duplicate
        // push of a cached message counts nothing).
        let increment_unread = foreign && !open && inserted;
        let preview = MessagePreview {
            text: preview_text(&dto),
            sender_id: dto.sender_id,
            sent_at: dto.created_at,
        };
        let known = self
            .conversations
            .move_to_top(conversation_id, preview.clone(), dto.created_at, increment_unread)
            .await;
        if !known {
            // Pushed into a conversation this client has never fetched.
            debug!(%conversation_id, "inbound message for unknown conversation, refreshing list");
            if let Err(err) = self.refresh_conversations().await {
                warn!(error = %err, "conversation list refresh failed");
            }
            self.conversations
                .move_to_top(conversation_id, preview, dto.created_at, increment_unread)
                .await;
        }

        self.notify(SyncUpdate::Messages { conversation_id });
        self.notify(SyncUpdate::Conversations);
        self.schedule_resync(conversation_id).await;
    }

    /// A pending optimistic entry matches the echo when sender, text and
    /// file agree and the timestamps sit within the grace window. Oldest
    /// pending entry wins when identical sends collide.
    async fn find_pending_echo(&self, dto: &MessageDto) -> Option<Uuid> {
        if dto.sender_id != self.user_id {
            return None;
        }
        let grace = chrono::Duration::from_std(self.config.echo_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        self.cache
            .get_all(dto.conversation_id)
            .await
            .into_iter()
            .filter(|m| m.status == DeliveryStatus::Sending && m.sender_id == self.user_id)
            .filter(|m| m.text == dto.text && m.file == dto.file)
            .filter(|m| (dto.created_at - m.created_at).abs() <= grace)
            .min_by_key(|m| m.created_at)
            .map(|m| m.id)
    }

    async fn on_receipt(
        &self,
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        user_id: Uuid,
        status: DeliveryStatus,
    ) {
        let mut changed = false;
        for message_id in message_ids {
            let advanced = match status {
                DeliveryStatus::Read => self.tracker.mark_read(message_id, &[user_id]).await,
                _ => self.tracker.mark_delivered(message_id, &[user_id]).await,
            };
            if advanced {
                if let Some(current) = self.tracker.status_of(message_id).await {
                    self.cache
                        .set_status(conversation_id, message_id, current)
                        .await;
                }
                self.notify(SyncUpdate::Delivery { message_id });
                changed = true;
            }
        }
        if changed {
            self.notify(SyncUpdate::Messages { conversation_id });
        }
    }

    // ========================================================================
    // Read marking and conversation lifecycle
    // ========================================================================

    /// Advance every cached foreign message to `Read`, zero the unread
    /// counter, and report the boundary to the server.
    pub async fn mark_read(&self, conversation_id: Uuid) {
        for message in self.cache.get_all(conversation_id).await {
            if message.sender_id == self.user_id {
                continue;
            }
            if message.status.rank() >= DeliveryStatus::Read.rank() {
                continue;
            }
            self.tracker.mark_read(message.id, &[self.user_id]).await;
            self.cache
                .set_status(conversation_id, message.id, DeliveryStatus::Read)
                .await;
        }
        self.conversations.mark_read(conversation_id).await;
        self.notify(SyncUpdate::Messages { conversation_id });
        self.notify(SyncUpdate::Conversations);

        if let Err(err) = self.api.mark_read(conversation_id, Utc::now()).await {
            warn!(%conversation_id, error = %err, "failed to report read boundary");
        }
    }

    /// Open a conversation: subscribe its room, restore the persisted slice,
    /// and reset the unread counter exactly once.
    pub async fn open_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        {
            let mut open = self.open_conversation.write().await;
            if let Some(previous) = open.take() {
                if previous != conversation_id {
                    let _ = self.channel.unsubscribe(previous).await;
                }
            }
            *open = Some(conversation_id);
        }
        self.channel.subscribe(conversation_id).await?;
        if let Err(err) = self.cache.hydrate(conversation_id).await {
            warn!(%conversation_id, error = %err, "could not rehydrate cached messages");
        }
        self.mark_read(conversation_id).await;
        self.notify(SyncUpdate::Messages { conversation_id });
        Ok(())
    }

    /// Leave the open conversation, dropping its room subscription.
    /// In-flight sends are not cancelled; their acks still settle.
    pub async fn close_conversation(&self) {
        if let Some(conversation_id) = self.open_conversation.write().await.take() {
            let _ = self.channel.unsubscribe(conversation_id).await;
        }
    }

    pub async fn open_conversation_id(&self) -> Option<Uuid> {
        *self.open_conversation.read().await
    }

    // ========================================================================
    // Edits, reactions, typing
    // ========================================================================

    /// Optimistic edit; the push echo re-applies it idempotently.
    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        text: String,
    ) -> AppResult<()> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("edited text is empty".into()));
        }
        if !self
            .cache
            .apply_edit(conversation_id, message_id, text.clone(), Utc::now())
            .await
        {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        self.notify(SyncUpdate::Messages { conversation_id });
        self.api.update_message(message_id, &text).await
    }

    pub async fn add_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> AppResult<()> {
        let reaction = Reaction {
            user_id: self.user_id,
            emoji: emoji.to_string(),
        };
        if !self
            .cache
            .add_reaction(conversation_id, message_id, reaction)
            .await
        {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        self.notify(SyncUpdate::Messages { conversation_id });
        self.api.add_reaction(message_id, emoji).await
    }

    pub async fn remove_reaction(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> AppResult<()> {
        if !self
            .cache
            .remove_reaction(conversation_id, message_id, self.user_id, emoji)
            .await
        {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        self.notify(SyncUpdate::Messages { conversation_id });
        self.api.remove_reaction(message_id, emoji).await
    }

    /// Fire-and-forget typing signal; never blocks the caller.
    pub async fn notify_typing(&self, conversation_id: Uuid) {
        let channel = Arc::clone(&self.channel);
        let event = OutboundEvent::Typing {
            conversation_id,
            user_id: self.user_id,
        };
        let bound = self.config.ack_timeout;
        tokio::spawn(async move {
            let _ = timeout(bound, channel.emit(event)).await;
        });
    }

    // ========================================================================
    // Connectivity and defensive resync
    // ========================================================================

    /// The transport dropped: every unacknowledged send fails fast and
    /// surfaces for manual retry.
    pub async fn on_disconnected(&self) {
        for conversation_id in self.cache.conversation_ids().await {
            for message in self.cache.get_all(conversation_id).await {
                if message.sender_id == self.user_id
                    && message.status == DeliveryStatus::Sending
                {
                    self.fail_send(conversation_id, message.id, "channel disconnected")
                        .await;
                }
            }
        }
    }

    /// The transport is back: re-subscribe the open room and resync instead
    /// of assuming no pushes were lost.
    pub async fn on_reconnected(&self) {
        if let Some(conversation_id) = self.open_conversation_id().await {
            if let Err(err) = self.channel.subscribe(conversation_id).await {
                warn!(%conversation_id, error = %err, "re-subscribe failed");
            }
            self.schedule_resync(conversation_id).await;
        }
        if let Err(err) = self.refresh_conversations().await {
            warn!(error = %err, "conversation list refresh failed after reconnect");
        }
    }

    /// Trailing-edge debounce: each new inbound event restarts the quiet
    /// period; one timer per conversation.
    pub async fn schedule_resync(&self, conversation_id: Uuid) {
        let Some(engine) = self.handle.upgrade() else {
            return;
        };
        let mut timers = self.resync_timers.lock().await;
        if let Some(previous) = timers.remove(&conversation_id) {
            previous.abort();
        }
        timers.insert(
            conversation_id,
            tokio::spawn(async move {
                tokio::time::sleep(engine.config.resync_debounce).await;
                if let Err(err) = engine.resync(conversation_id).await {
                    warn!(%conversation_id, error = %err, "defensive resync failed");
                }
            }),
        );
    }

    /// Authoritative refetch through the merge-safe cache refill.
    pub async fn resync(&self, conversation_id: Uuid) -> AppResult<()> {
        let page = self
            .api
            .fetch_messages(conversation_id, self.config.cache_capacity, 0)
            .await?;
        let mut messages = Vec::with_capacity(page.len());
        for dto in page {
            let status = self.status_for(&dto).await;
            messages.push(build_message(&dto, status));
        }
        self.cache.replace_all(conversation_id, messages).await;
        self.notify(SyncUpdate::Messages { conversation_id });
        Ok(())
    }

    async fn refresh_conversations(&self) -> AppResult<()> {
        let conversations = self.api.list_conversations().await?;
        for dto in conversations {
            self.conversations.upsert(dto).await;
        }
        self.notify(SyncUpdate::Conversations);
        Ok(())
    }

    async fn status_for(&self, dto: &MessageDto) -> DeliveryStatus {
        let fallback = if dto.sender_id == self.user_id {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Delivered
        };
        self.tracker.status_of(dto.id).await.unwrap_or(fallback)
    }

    fn notify(&self, update: SyncUpdate) {
        let _ = self.updates.send(update);
    }
}

fn build_message(dto: &MessageDto, status: DeliveryStatus) -> Message {
    Message {
        id: dto.id,
        conversation_id: dto.conversation_id,
        sender_id: dto.sender_id,
        text: dto.text.clone(),
        file: dto.file.clone(),
        reply_to: dto.reply_to,
        created_at: dto.created_at,
        status,
        reactions: dto.reactions.clone(),
        edited: dto.edited,
        edited_at: dto.edited_at,
    }
}

fn preview_of(message: &Message) -> MessagePreview {
    MessagePreview {
        text: message.preview_text(),
        sender_id: message.sender_id,
        sent_at: message.created_at,
    }
}

fn preview_text(dto: &MessageDto) -> String {
    match &dto.file {
        Some(file) if dto.text.trim().is_empty() => format!("[file] {}", file.name),
        _ => dto.text.clone(),
    }
}
