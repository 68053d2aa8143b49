/// Conversation synchronization tests
///
/// Unread bookkeeping across open/closed conversations, the debounced
/// defensive resync with its merge-not-overwrite refill, disconnect/
/// reconnect recovery, and state survival across session restarts.

mod common;

use common::*;

use messaging_client::channel::{AckMode, ChannelEvent};
use messaging_client::models::conversation::Section;
use messaging_client::models::message::{DeliveryStatus, MessageDraft, MessageDto};

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn open_conversation_stays_read_while_closed_one_accumulates() {
    let h = start_harness().await;
    let engine = &h.session.engine;
    let peer = Uuid::new_v4();

    // === STEP 1: two conversations, A open, B closed ===
    let a = direct_dto(vec![h.user_id, peer]);
    let b = direct_dto(vec![h.user_id, peer]);
    for conv in [&a, &b] {
        engine
            .dispatch(ChannelEvent::ConversationCreated {
                conversation: (*conv).clone(),
            })
            .await;
    }
    engine.open_conversation(a.id).await.expect("open");

    // === STEP 2: one inbound message each ===
    engine
        .dispatch(ChannelEvent::MessageNew {
            message: inbound_dto(a.id, peer, "to the open one"),
        })
        .await;
    engine
        .dispatch(ChannelEvent::MessageNew {
            message: inbound_dto(b.id, peer, "to the closed one"),
        })
        .await;

    // === STEP 3: A stayed read and visible, B accumulated and moved up ===
    assert_eq!(engine.cache().get_all(a.id).await.len(), 1);
    assert_eq!(engine.conversations().get(a.id).await.unwrap().unread_count, 0);
    assert_eq!(engine.conversations().get(b.id).await.unwrap().unread_count, 1);

    let section = engine.conversations().section(Section::Direct).await;
    assert_eq!(
        section[0].id, b.id,
        "the conversation with the newest traffic heads its section"
    );
    assert_eq!(
        section[0].last_message.as_ref().map(|p| p.text.as_str()),
        Some("to the closed one")
    );
}

#[tokio::test]
async fn opening_resets_unread_exactly_once() {
    let h = start_harness().await;
    let engine = &h.session.engine;
    let peer = Uuid::new_v4();
    let conv = direct_dto(vec![h.user_id, peer]);
    engine
        .dispatch(ChannelEvent::ConversationCreated {
            conversation: conv.clone(),
        })
        .await;

    for i in 0..3 {
        engine
            .dispatch(ChannelEvent::MessageNew {
                message: inbound_dto(conv.id, peer, &format!("m{i}")),
            })
            .await;
    }
    assert_eq!(
        engine.conversations().get(conv.id).await.unwrap().unread_count,
        3
    );

    engine.open_conversation(conv.id).await.expect("open");
    assert_eq!(
        engine.conversations().get(conv.id).await.unwrap().unread_count,
        0
    );

    // The read boundary went to the server, and every foreign message is Read.
    assert!(!h.api.read_calls.lock().await.is_empty());
    for message in engine.cache().get_all(conv.id).await {
        assert_eq!(message.status, DeliveryStatus::Read);
    }
}

#[tokio::test]
async fn defensive_resync_is_debounced_and_merge_safe() {
    let h = start_harness().await;
    let engine = &h.session.engine;
    let peer = Uuid::new_v4();
    let conv = direct_dto(vec![h.user_id, peer]);
    engine
        .dispatch(ChannelEvent::ConversationCreated {
            conversation: conv.clone(),
        })
        .await;

    // === STEP 1: five pushes arrive in a burst ===
    let pushed: Vec<MessageDto> = (0..5)
        .map(|i| inbound_dto(conv.id, peer, &format!("push{i}")))
        .collect();
    for dto in &pushed {
        engine
            .dispatch(ChannelEvent::MessageNew {
                message: dto.clone(),
            })
            .await;
    }

    // The REST snapshot lags behind: it knows only the first two.
    h.api
        .seed_messages(conv.id, pushed[..2].to_vec())
        .await;

    // === STEP 2: the debounced refetch runs after the quiet period ===
    tokio::time::sleep(Duration::from_millis(150)).await;
    let fetches = h.api.fetch_calls.lock().await.clone();
    assert!(
        !fetches.is_empty(),
        "inbound traffic must schedule a defensive resync"
    );
    assert!(
        fetches.len() < 5,
        "the resync must be debounced, got {} fetches",
        fetches.len()
    );

    // === STEP 3: the short snapshot merged instead of shrinking ===
    let cached = engine.cache().get_all(conv.id).await;
    assert_eq!(
        cached.len(),
        5,
        "a stale snapshot must never erase locally pushed messages"
    );
}

#[tokio::test]
async fn push_into_unknown_conversation_refreshes_the_list() {
    let h = start_harness().await;
    let engine = &h.session.engine;
    let peer = Uuid::new_v4();

    // The server knows the conversation; this client has never fetched it.
    let conv = direct_dto(vec![h.user_id, peer]);
    h.api.seed_conversation(conv.clone()).await;

    engine
        .dispatch(ChannelEvent::MessageNew {
            message: inbound_dto(conv.id, peer, "first contact"),
        })
        .await;

    let conversation = engine
        .conversations()
        .get(conv.id)
        .await
        .expect("list refresh must surface the conversation");
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(engine.cache().get_all(conv.id).await.len(), 1);
}

#[tokio::test]
async fn disconnect_fails_pending_sends_fast_and_reconnect_resyncs() {
    let h = start_harness().await;
    let engine = h.session.engine.clone();
    let peer = Uuid::new_v4();
    let conv = direct_dto(vec![h.user_id, peer]);
    engine
        .dispatch(ChannelEvent::ConversationCreated {
            conversation: conv.clone(),
        })
        .await;
    engine.open_conversation(conv.id).await.expect("open");

    // === STEP 1: a send is in flight when the socket drops ===
    h.channel.set_ack_mode(AckMode::Manual).await;
    let sender = engine.clone();
    let conv_id = conv.id;
    let send_task =
        tokio::spawn(async move { sender.send(conv_id, MessageDraft::text("doomed")).await });
    while h.channel.emitted().await.is_empty() {
        tokio::task::yield_now().await;
    }

    h.channel.set_connected(false).await;
    engine.on_disconnected().await;

    let temp_id = send_task.await.expect("join").expect("send");
    let cached = engine.cache().find(conv.id, temp_id).await.expect("entry");
    assert_eq!(
        cached.status,
        DeliveryStatus::Failed,
        "pending sends fail fast when the channel drops"
    );

    // === STEP 2: reconnect re-subscribes and resyncs ===
    h.api.seed_messages(conv.id, vec![]).await;
    h.channel.set_connected(true).await;
    h.channel.set_ack_mode(AckMode::Auto).await;
    engine.on_reconnected().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        h.channel.subscribed_rooms().await.contains(&conv.id),
        "the open conversation must be re-subscribed after reconnect"
    );
    assert!(
        h.api.fetch_calls.lock().await.contains(&conv.id),
        "reconnect must trigger a defensive resync"
    );
    // The empty authoritative snapshot must not erase the failed local send.
    assert!(engine.cache().find(conv.id, temp_id).await.is_some());

    // === STEP 3: the failed send retries cleanly ===
    engine.retry(conv.id, temp_id).await.expect("retry");
    let cached = engine.cache().get_all(conv.id).await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn state_survives_a_session_restart() {
    init_tracing();
    let storage = messaging_client::storage::MemoryStorage::new();
    let api = Arc::new(ScriptedApi::default());
    let user_id = Uuid::new_v4();
    let peer = Uuid::new_v4();
    let conv = direct_dto(vec![user_id, peer]);

    // === STEP 1: first session sends and receives, then logs out ===
    let h1 = start_harness_for(fast_config(), user_id, api.clone(), storage.clone()).await;
    h1.session
        .engine
        .dispatch(ChannelEvent::ConversationCreated {
            conversation: conv.clone(),
        })
        .await;
    h1.session
        .engine
        .send(conv.id, MessageDraft::text("hello"))
        .await
        .expect("send");
    h1.session
        .engine
        .dispatch(ChannelEvent::MessageNew {
            message: inbound_dto(conv.id, peer, "reply"),
        })
        .await;
    h1.session.logout().await.expect("logout");

    // === STEP 2: a fresh session over the same storage rehydrates ===
    let h2 = start_harness_for(fast_config(), user_id, api, storage).await;
    h2.session
        .engine
        .dispatch(ChannelEvent::ConversationCreated {
            conversation: conv.clone(),
        })
        .await;
    h2.session
        .engine
        .open_conversation(conv.id)
        .await
        .expect("open");

    let cached = h2.session.engine.cache().get_all(conv.id).await;
    assert_eq!(cached.len(), 2, "persisted slice must survive the restart");

    let own = cached
        .iter()
        .find(|m| m.sender_id == user_id)
        .expect("own message");
    assert_eq!(own.status, DeliveryStatus::Sent);

    let foreign = cached
        .iter()
        .find(|m| m.sender_id == peer)
        .expect("foreign message");
    assert_eq!(
        foreign.status,
        DeliveryStatus::Read,
        "opening the conversation marks restored foreign messages read"
    );
}

#[tokio::test]
async fn inbound_pump_delivers_channel_pushes() {
    let h = start_harness().await;
    let peer = Uuid::new_v4();
    let conv = direct_dto(vec![h.user_id, peer]);

    // Through the channel this time, not direct dispatch.
    h.channel.push(ChannelEvent::ConversationCreated {
        conversation: conv.clone(),
    });
    h.channel.push(ChannelEvent::MessageNew {
        message: inbound_dto(conv.id, peer, "over the wire"),
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.session.engine.conversations().contains(conv.id).await);
    assert_eq!(h.session.engine.cache().get_all(conv.id).await.len(), 1);
}
