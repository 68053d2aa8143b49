pub mod conversation;
pub mod message;

// Re-export for convenience
pub use conversation::{Conversation, ConversationDto, ConversationType, MessagePreview, Section};
pub use message::{DeliveryStatus, FileRef, Message, MessageDraft, MessageDto, Reaction};
