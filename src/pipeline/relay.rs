//! Relay cycle: fetch, decompose, converse, persist, reply.
//!
//! Each message is its own critical section: load the store, merge the
//! user turn, ask the chat capability, record the reply, save, then send.
//! The store is only written once a reply exists, so a failed chat call
//! leaves history exactly as it was.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::email::{EmailChannel, reply_subject};
use crate::channels::email_types::RawMail;
use crate::channels::transport::{FetchedMail, MailTransport};
use crate::config::RelayConfig;
use crate::error::{ChannelError, PipelineError};
use crate::llm::{ChatProvider, create_provider};
use crate::pipeline::access::AllowList;
use crate::pipeline::decompose::Decomposer;
use crate::pipeline::turn::{TurnBuilder, record_reply};
use crate::store::{ConversationStore, JsonFileStore};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A reply was generated, persisted, and sent.
    Replied { sender: String, reset: bool },
    /// Sender not allow-listed. Nothing stored, nothing sent.
    Rejected { sender: String },
    /// No body, attachments, or images. Nothing to ask.
    Empty { sender: String },
}

/// Per-cycle tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub replied: usize,
    pub rejected: usize,
    pub empty: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn total(&self) -> usize {
        self.replied + self.rejected + self.empty + self.failed
    }
}

/// Wires the transport, store, and chat capability around the pipeline.
pub struct Relay {
    transport: Arc<dyn MailTransport>,
    chat: Arc<dyn ChatProvider>,
    store: Arc<dyn ConversationStore>,
    decomposer: Decomposer,
    builder: TurnBuilder,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        chat: Arc<dyn ChatProvider>,
        store: Arc<dyn ConversationStore>,
        decomposer: Decomposer,
        builder: TurnBuilder,
    ) -> Self {
        Self {
            transport,
            chat,
            store,
            decomposer,
            builder,
        }
    }

    /// Wire the IMAP/SMTP channel, chat provider, and JSON store from config.
    pub fn from_config(config: &RelayConfig) -> crate::error::Result<Self> {
        let chat = create_provider(&config.llm)?;
        Ok(Self::new(
            Arc::new(EmailChannel::new(config.email.clone())),
            chat,
            Arc::new(JsonFileStore::new(&config.store_path)),
            Decomposer::new(AllowList::new(&config.pipeline.allowed_senders)),
            TurnBuilder::new(
                config.pipeline.reset_policy.clone(),
                config.pipeline.attachment_char_limit,
            ),
        ))
    }

    /// Fetch all unseen mail and process it in arrival order.
    ///
    /// Only a failed fetch is an error; per-message failures are logged and
    /// counted so the rest of the batch still runs.
    pub async fn run_cycle(&self) -> Result<CycleSummary, ChannelError> {
        let fetched = self.transport.fetch_unseen().await?;
        let mut summary = CycleSummary::default();
        if fetched.is_empty() {
            debug!("No new mail");
            return Ok(summary);
        }

        info!(count = fetched.len(), transport = self.transport.name(), "Processing new mail");
        for mail in &fetched {
            match self.process_fetched(mail).await {
                Ok(Outcome::Replied { .. }) => summary.replied += 1,
                Ok(Outcome::Rejected { .. }) => summary.rejected += 1,
                Ok(Outcome::Empty { .. }) => summary.empty += 1,
                Err(e) => {
                    error!(uid = %mail.uid, error = %e, "Failed to process message");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Parse and process one fetched message.
    pub async fn process_fetched(&self, mail: &FetchedMail) -> Result<Outcome, PipelineError> {
        let raw = RawMail::parse(&mail.raw)?;
        self.process(&raw).await
    }

    /// Process one parsed message end to end.
    pub async fn process(&self, mail: &RawMail) -> Result<Outcome, PipelineError> {
        let msg = match self.decomposer.decompose(mail) {
            Ok(msg) => msg,
            Err(rejection) => {
                warn!(sender = %rejection.sender, "Ignoring message from non-allow-listed sender");
                return Ok(Outcome::Rejected {
                    sender: rejection.sender,
                });
            }
        };

        for skipped in &msg.skipped {
            debug!(filename = %skipped.filename, reason = %skipped.reason, "Attachment not forwarded");
        }

        if msg.is_empty() {
            info!(sender = %msg.sender, "Message has no content, not replying");
            return Ok(Outcome::Empty { sender: msg.sender });
        }

        let mut conversations = self.store.load().await?;
        let built = self.builder.apply(&msg, &mut conversations);

        debug!(
            sender = %msg.sender,
            model = self.chat.model_name(),
            turns = built.conversation.len(),
            "Requesting reply"
        );
        let reply = self.chat.complete(&built.conversation).await?;

        record_reply(&mut conversations, &msg.sender, &reply)?;
        self.store.save(&conversations).await?;

        self.transport
            .send(&msg.sender, &reply_subject(&msg.subject), &reply)
            .await?;
        info!(sender = %msg.sender, "Reply sent");

        Ok(Outcome::Replied {
            sender: msg.sender,
            reset: built.reset,
        })
    }
}
