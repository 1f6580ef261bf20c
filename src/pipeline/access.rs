use std::collections::HashSet;

use crate::channels::email_types::normalize_sender;

/// Set of sender identities permitted to trigger processing.
///
/// Entries are normalized the same way as inbound `From` headers, so
/// `"Alice <Alice@Example.com>"` in config matches `alice@example.com`.
/// An empty list denies everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    senders: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let senders = entries
            .into_iter()
            .map(|s| normalize_sender(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        Self { senders }
    }

    /// Check an already-normalized sender identity.
    pub fn permits(&self, sender: &str) -> bool {
        self.senders.contains(sender)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
