//! Turn building: converts a decomposed message into a user chat turn
//! and merges it into the sender's conversation.

use tracing::info;

use crate::config::{DEFAULT_ATTACHMENT_CHAR_LIMIT, ResetPolicy};
use crate::error::PipelineError;
use crate::pipeline::types::{
    ChatTurn, ContentBlock, Conversation, ConversationMap, NormalizedMessage,
};

/// Appended to attachment text cut at the character limit.
pub const TRUNCATION_MARKER: &str = "...";

/// Result of merging a new user turn into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTurn {
    /// Content blocks of the new user turn.
    pub content: Vec<ContentBlock>,
    /// The sender's full conversation, ending with the new user turn.
    pub conversation: Conversation,
    /// Whether prior history was discarded.
    pub reset: bool,
}

/// Assembles chat turns and applies the continuation policy.
#[derive(Debug, Clone)]
pub struct TurnBuilder {
    reset_policy: ResetPolicy,
    attachment_char_limit: usize,
}

impl Default for TurnBuilder {
    fn default() -> Self {
        Self::new(ResetPolicy::default(), DEFAULT_ATTACHMENT_CHAR_LIMIT)
    }
}

impl TurnBuilder {
    pub fn new(reset_policy: ResetPolicy, attachment_char_limit: usize) -> Self {
        Self {
            reset_policy,
            attachment_char_limit,
        }
    }

    /// Body text block, then one block per text attachment, then one per image.
    pub fn content_blocks(&self, msg: &NormalizedMessage) -> Vec<ContentBlock> {
        let mut blocks = Vec::with_capacity(1 + msg.attachments.len() + msg.images.len());
        blocks.push(ContentBlock::text(&msg.body));
        blocks.extend(msg.attachments.iter().map(|att| {
            ContentBlock::text(format!(
                "[Attached File: {}]\n{}",
                att.filename,
                truncate_chars(&att.text, self.attachment_char_limit)
            ))
        }));
        blocks.extend(msg.images.iter().map(ContentBlock::image));
        blocks
    }

    /// Build the user turn for `msg` and merge it into `conversations`.
    ///
    /// Starts a fresh conversation when the subject carries the reset marker
    /// or the sender has no history; otherwise appends to the existing one.
    /// The returned conversation is what gets sent to the chat capability.
    pub fn apply(&self, msg: &NormalizedMessage, conversations: &mut ConversationMap) -> BuiltTurn {
        let content = self.content_blocks(msg);
        let turn = ChatTurn::user(content.clone());

        let has_history = conversations
            .get(&msg.sender)
            .is_some_and(|turns| !turns.is_empty());
        let reset = self.reset_policy.is_reset(&msg.subject) || !has_history;

        let conversation = if reset {
            info!(sender = %msg.sender, "Starting new conversation");
            conversations.insert(msg.sender.clone(), vec![turn]);
            &conversations[&msg.sender]
        } else {
            let turns = conversations.entry(msg.sender.clone()).or_default();
            turns.push(turn);
            info!(sender = %msg.sender, turns = turns.len(), "Continuing conversation");
            &*turns
        };

        BuiltTurn {
            content,
            conversation: conversation.clone(),
            reset,
        }
    }
}

/// Record the model's reply as an assistant turn on `sender`'s conversation.
pub fn record_reply(
    conversations: &mut ConversationMap,
    sender: &str,
    reply: &str,
) -> Result<(), PipelineError> {
    let turns = conversations
        .get_mut(sender)
        .ok_or_else(|| PipelineError::MissingConversation {
            sender: sender.to_string(),
        })?;
    turns.push(ChatTurn::assistant(reply));
    Ok(())
}

/// First `limit` characters of `text`, with the marker appended if cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}
