//! Mail transport: inbound fetch, outbound reply, and the part tree the
//! pipeline consumes.

pub mod email;
pub mod email_types;
pub mod transport;

pub use email::{EmailChannel, reply_subject};
pub use email_types::{MailPart, PartBody, RawMail};
pub use transport::{FetchedMail, MailTransport};
