pub mod api_client;
pub mod conversation_store;
pub mod delivery_tracker;
pub mod message_cache;
pub mod sync_engine;
