//! Error types for the mail relay.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to connect: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Failed to fetch mail on channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Conversation store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persisted state exists but cannot be parsed. Never reset silently.
    #[error("Conversation store at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to serialize conversation store: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chat capability errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while relaying a single message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store failed: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("Conversation for {sender} vanished before the reply was recorded")]
    MissingConversation { sender: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
