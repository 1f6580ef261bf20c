//! Persistence layer: per-sender conversation history.

pub mod json_file;
pub mod traits;

pub use json_file::JsonFileStore;
pub use traits::ConversationStore;
