//! `ConversationStore` trait: the single source of truth for history.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::pipeline::types::ConversationMap;

/// Whole-map persistence for sender conversations.
///
/// Callers load the full map at the start of a cycle and save it once after
/// a successful reply. There are no partial writes and no locking; the
/// load → mutate → save sequence for one message is the caller's critical
/// section.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load every conversation. A store that does not exist yet is empty.
    /// Unparseable state is [`StoreError::Corrupt`], never an empty map.
    async fn load(&self) -> Result<ConversationMap, StoreError>;

    /// Replace the persisted state with `conversations`.
    async fn save(&self, conversations: &ConversationMap) -> Result<(), StoreError>;
}
