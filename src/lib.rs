//! Mail Relay: mailbox-driven conversational LLM relay.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
