//! Mail transport abstraction.

use async_trait::async_trait;

use crate::error::ChannelError;

/// One fetched message, already marked consumed on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMail {
    /// Server-side message identifier, for logging.
    pub uid: String,
    /// Raw RFC 822 bytes.
    pub raw: Vec<u8>,
}

/// Inbound fetch and outbound reply for a mailbox.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name, for logging.
    fn name(&self) -> &str;

    /// Fetch every unseen message and mark it seen.
    async fn fetch_unseen(&self) -> Result<Vec<FetchedMail>, ChannelError>;

    /// Send a plain-text message.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError>;
}
