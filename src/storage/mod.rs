//! Durable key/value persistence port.
//!
//! Backs the per-conversation message cache slices and the delivery status
//! map so both survive a process restart. Values are JSON documents owned by
//! the callers; this layer only moves strings.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key for a conversation's cached message slice.
pub fn messages_key(conversation_id: Uuid) -> String {
    format!("messages:{}", conversation_id)
}

/// Key for the delivery status map.
pub fn delivery_key() -> String {
    "delivery:status".to_string()
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> AppResult<()>;
    async fn clear(&self, key: &str) -> AppResult<()>;
}

/// Select the backend the configuration asks for: file-backed when a storage
/// directory is set, in-memory otherwise.
pub async fn from_config(config: &Config) -> AppResult<Arc<dyn Storage>> {
    match &config.storage_dir {
        Some(dir) => Ok(Arc::new(FileStorage::new(dir.clone()).await?)),
        None => Ok(Arc::new(MemoryStorage::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_key_is_per_conversation() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(messages_key(a).starts_with("messages:"));
        assert_ne!(messages_key(a), messages_key(b));
    }

    #[tokio::test]
    async fn config_without_dir_selects_memory_backend() {
        let storage = from_config(&Config::default()).await.expect("storage");
        storage.set("k", "v".into()).await.expect("set");
        assert_eq!(storage.get("k").await.expect("get"), Some("v".into()));
    }
}
