//! Client-side conversation synchronization engine for a chat client.
//!
//! The crate owns the state machine between the UI and the transport:
//! optimistic sends that show up before the server confirms them,
//! reconciliation of those optimistic records against out-of-order push
//! events, a bounded persisted per-conversation message cache, and a
//! conversation list whose ordering and unread counters stay correct under
//! concurrent inbound/outbound traffic.
//!
//! Transport, REST access and durable storage are reached only through the
//! narrow collaborator traits in [`channel`], [`services::api_client`] and
//! [`storage`].

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::ClientSession;
