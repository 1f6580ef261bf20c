//! LLM integration for the relay.
//!
//! The pipeline only needs one capability: send an ordered list of chat
//! turns, get a reply string back. [`ChatProvider`] is that seam;
//! [`OpenAiChat`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint.

pub mod openai;

pub use openai::OpenAiChat;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::pipeline::types::ChatTurn;

/// Chat completion capability.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Complete a conversation, oldest turn first. Returns the reply text.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, LlmError>;
}

/// Create the chat provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn ChatProvider>, LlmError> {
    let provider = OpenAiChat::new(config)?;
    tracing::info!("Using OpenAI-compatible endpoint {} (model: {})", config.api_base, config.model);
    Ok(Arc::new(provider))
}
