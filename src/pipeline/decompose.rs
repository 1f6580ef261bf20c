//! Message decomposition: access control, MIME traversal, and routing of
//! attachment parts through the extractor.

use tracing::{debug, warn};

use crate::channels::email_types::{MailPart, PartBody, RawMail, normalize_sender, strip_html};
use crate::pipeline::access::AllowList;
use crate::pipeline::extract::extract;
use crate::pipeline::types::{
    ExtractResult, NormalizedMessage, RejectReason, Rejection, SkippedAttachment, TextAttachment,
};

/// Turns a fetched mail message into a [`NormalizedMessage`].
#[derive(Debug, Clone)]
pub struct Decomposer {
    allow_list: AllowList,
}

/// Accumulator for one multipart walk.
#[derive(Default)]
struct Walk {
    body: Option<String>,
    html: Option<String>,
    attachments: Vec<TextAttachment>,
    images: Vec<String>,
    skipped: Vec<SkippedAttachment>,
}

impl Decomposer {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// Decompose a message, or reject it if the sender is not allow-listed.
    pub fn decompose(&self, mail: &RawMail) -> Result<NormalizedMessage, Rejection> {
        let sender = normalize_sender(&mail.from);
        if !self.allow_list.permits(&sender) {
            return Err(Rejection {
                sender,
                reason: RejectReason::NotWhitelisted,
            });
        }

        let mut walk = Walk::default();
        if mail.root.is_multipart() {
            walk.visit(&mail.root);
        } else {
            walk.body = Some(decode_body(mail.root.payload()));
        }

        let body = match (walk.body, walk.html) {
            (Some(text), _) => text,
            (None, Some(html)) => strip_html(&html),
            (None, None) => String::new(),
        };

        Ok(NormalizedMessage {
            sender,
            subject: mail.subject.clone(),
            body: body.trim().to_string(),
            attachments: walk.attachments,
            images: walk.images,
            skipped: walk.skipped,
        })
    }
}

impl Walk {
    fn visit(&mut self, part: &MailPart) {
        match &part.body {
            PartBody::Multipart(children) => {
                for child in children {
                    self.visit(child);
                }
            }
            PartBody::Leaf(bytes) => self.visit_leaf(part, bytes),
        }
    }

    fn visit_leaf(&mut self, part: &MailPart, bytes: &[u8]) {
        if !part.is_attachment {
            // Last inline text/plain part wins.
            match part.content_type.as_str() {
                "text/plain" => self.body = Some(decode_body(bytes)),
                "text/html" if self.html.is_none() => self.html = Some(decode_body(bytes)),
                _ => {}
            }
            return;
        }

        let Some(filename) = part.filename.as_deref() else {
            debug!(content_type = %part.content_type, "Ignoring attachment without filename");
            return;
        };

        match extract(filename, bytes) {
            ExtractResult::Text(text) if !text.is_empty() => {
                self.attachments.push(TextAttachment {
                    filename: filename.to_string(),
                    text,
                });
            }
            ExtractResult::Text(_) => self.skip(filename, "no extractable text"),
            ExtractResult::Image(uri) => self.images.push(uri),
            ExtractResult::Unsupported(reason) => self.skip(filename, &reason),
        }
    }

    fn skip(&mut self, filename: &str, reason: &str) {
        warn!(filename = %filename, reason = %reason, "Skipping attachment");
        self.skipped.push(SkippedAttachment {
            filename: filename.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Strict UTF-8 decode; undecodable bodies are treated as empty.
fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(error = %e, "Body is not valid UTF-8, treating as empty");
            String::new()
        }
    }
}
