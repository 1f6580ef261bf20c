//! Shared types for the message processing pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Conversation model ──────────────────────────────────────────────

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A typed unit of turn content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Self-describing `data:<mime>;base64,<bytes>` URI.
    Image { uri: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(uri: impl Into<String>) -> Self {
        Self::Image { uri: uri.into() }
    }
}

/// One exchange unit in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatTurn {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Assistant turn carrying a single text block.
    pub fn assistant(reply: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(reply)],
        }
    }
}

/// Ordered turns for one sender, oldest first.
pub type Conversation = Vec<ChatTurn>;

/// Sender identity → conversation. Ordered so persisted output is stable.
pub type ConversationMap = BTreeMap<String, Conversation>;

// ── Decomposed message ──────────────────────────────────────────────

/// A text attachment that survived extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAttachment {
    pub filename: String,
    pub text: String,
}

/// An attachment dropped during decomposition, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAttachment {
    pub filename: String,
    pub reason: String,
}

/// Structured result of decomposing one raw mail message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub sender: String,
    pub subject: String,
    /// Whitespace-trimmed body text.
    pub body: String,
    /// Text attachments in encounter order.
    pub attachments: Vec<TextAttachment>,
    /// Image data URIs in encounter order.
    pub images: Vec<String>,
    pub skipped: Vec<SkippedAttachment>,
}

impl NormalizedMessage {
    /// Nothing to ask the model about.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.attachments.is_empty() && self.images.is_empty()
    }
}

/// Why a message was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotWhitelisted,
}

/// A message dropped before processing. No reply, no store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub sender: String,
    pub reason: RejectReason,
}

// ── Extraction ──────────────────────────────────────────────────────

/// Outcome of extracting one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractResult {
    Text(String),
    /// `data:` URI embedding the image bytes.
    Image(String),
    Unsupported(String),
}
