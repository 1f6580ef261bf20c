//! Message processing pipeline.
//!
//! Every fetched message flows through:
//! 1. `Decomposer::decompose()`: allow-list check, MIME walk, attachment extraction
//! 2. `TurnBuilder::apply()`: user turn assembly, continuation or reset
//! 3. `ChatProvider::complete()`: the model's reply
//! 4. `record_reply()` + store save, then the reply email
//!
//! [`relay::Relay`] drives one message or one whole fetch cycle.

pub mod access;
pub mod decompose;
pub mod extract;
pub mod relay;
pub mod turn;
pub mod types;
