use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum messages retained per conversation; oldest entries are
    /// evicted beyond this.
    pub cache_capacity: usize,
    /// How long a send waits for the server acknowledgment before the
    /// message is marked failed.
    pub ack_timeout: Duration,
    /// Window within which a local pending send is matched to its server
    /// echo.
    pub echo_grace: Duration,
    /// Quiet period before a defensive refetch runs after inbound traffic.
    pub resync_debounce: Duration,
    /// Directory for file-backed storage; `None` selects in-memory storage.
    pub storage_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: 50,
            ack_timeout: Duration::from_secs(5),
            echo_grace: Duration::from_secs(10),
            resync_debounce: Duration::from_millis(500),
            storage_dir: None,
        }
    }
}

impl Config {
    fn env_millis(name: &str, default: Duration) -> Duration {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Self::default();

        let cache_capacity = env::var("CHAT_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_capacity);
        if cache_capacity == 0 {
            return Err(AppError::Config(
                "CHAT_CACHE_CAPACITY must be positive".into(),
            ));
        }

        let storage_dir = env::var("CHAT_STORAGE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            cache_capacity,
            ack_timeout: Self::env_millis("CHAT_ACK_TIMEOUT_MS", defaults.ack_timeout),
            echo_grace: Self::env_millis("CHAT_ECHO_GRACE_MS", defaults.echo_grace),
            resync_debounce: Self::env_millis("CHAT_RESYNC_DEBOUNCE_MS", defaults.resync_debounce),
            storage_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.cache_capacity, 50);
        assert!(config.ack_timeout >= Duration::from_secs(1));
        assert!(config.resync_debounce < config.ack_timeout);
        assert!(config.storage_dir.is_none());
    }
}
