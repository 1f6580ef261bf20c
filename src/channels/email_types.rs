//! Email-specific types: the `RawMail` part tree, sender normalization,
//! and the `mail_parser` adapter that builds the tree from RFC 822 bytes.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use crate::error::ChannelError;

/// Nested multiparts deeper than this are dropped.
const MAX_PART_DEPTH: usize = 32;

/// A fetched mail message reduced to the shape the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMail {
    /// `From` header address (not yet normalized).
    pub from: String,
    pub subject: String,
    pub root: MailPart,
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPart {
    /// Lowercase `type/subtype`. Parts without a header default to `text/plain`.
    pub content_type: String,
    /// `Content-Disposition: attachment`.
    pub is_attachment: bool,
    pub filename: Option<String>,
    pub body: PartBody,
}

/// Payload of a MIME node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    /// Transfer-decoded payload bytes.
    Leaf(Vec<u8>),
    Multipart(Vec<MailPart>),
}

impl MailPart {
    /// Inline leaf part.
    pub fn leaf(content_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.to_ascii_lowercase(),
            is_attachment: false,
            filename: None,
            body: PartBody::Leaf(bytes.into()),
        }
    }

    /// Leaf part with an attachment disposition and filename.
    pub fn attachment(filename: &str, content_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.to_ascii_lowercase(),
            is_attachment: true,
            filename: Some(filename.to_string()),
            body: PartBody::Leaf(bytes.into()),
        }
    }

    pub fn multipart(subtype: &str, children: Vec<MailPart>) -> Self {
        Self {
            content_type: format!("multipart/{}", subtype.to_ascii_lowercase()),
            is_attachment: false,
            filename: None,
            body: PartBody::Multipart(children),
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, PartBody::Multipart(_))
    }

    /// Payload bytes of a leaf; empty for multiparts.
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            PartBody::Leaf(bytes) => bytes,
            PartBody::Multipart(_) => &[],
        }
    }
}

impl RawMail {
    /// Parse RFC 822 bytes into a part tree.
    pub fn parse(raw: &[u8]) -> Result<Self, ChannelError> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| ChannelError::InvalidMessage("unparseable RFC 822 message".into()))?;

        let from = message
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let subject = message.subject().unwrap_or_default().to_string();
        let root = convert_part(&message, 0, 0)
            .ok_or_else(|| ChannelError::InvalidMessage("message has no body part".into()))?;

        Ok(Self {
            from,
            subject,
            root,
        })
    }
}

fn convert_part(message: &Message<'_>, id: usize, depth: usize) -> Option<MailPart> {
    if depth > MAX_PART_DEPTH {
        return None;
    }
    let part = message.parts.get(id)?;

    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "text/plain".to_string())
        .to_ascii_lowercase();
    let is_attachment = part
        .content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));
    let filename = part.attachment_name().map(|s| s.to_string());

    let body = match &part.body {
        PartType::Multipart(children) => PartBody::Multipart(
            children
                .iter()
                .filter_map(|child| convert_part(message, *child as usize, depth + 1))
                .collect(),
        ),
        // Embedded message/rfc822: walk into it like any other container.
        PartType::Message(inner) => {
            PartBody::Multipart(convert_part(inner, 0, depth + 1).into_iter().collect())
        }
        _ => PartBody::Leaf(part.contents().to_vec()),
    };

    Some(MailPart {
        content_type,
        is_attachment,
        filename,
        body,
    })
}

/// Normalize a `From` header value into a sender identity.
///
/// Strips the display name and angle brackets, trims, and lowercases:
/// `"Alice <Alice@Example.com>"` → `"alice@example.com"`.
pub fn normalize_sender(from: &str) -> String {
    from.rsplit('<')
        .next()
        .unwrap_or_default()
        .replace('>', "")
        .trim()
        .to_lowercase()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
