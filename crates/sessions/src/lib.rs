//! Conversation history for casestream: the entry model and the stores it
//! is persisted through.

pub mod history;
pub mod store;

pub use history::{BotMessage, ConversationHistory, HistoryEntry, UserMessage};
pub use store::{HistoryStore, JsonFileStore, MemoryStore};
