use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelId;

/// Sentinel author for anonymous posts.
pub const ANON_AUTHOR: &str = "anon";

/// Upper bound on stored message text, in characters. Longer input is
/// truncated, not rejected.
pub const MAX_TEXT_CHARS: usize = 2000;

/// A single chat message. Soft-deleted rows keep their record but are
/// excluded from ordinary reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel: ChannelId,
    pub author: String,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    pub fn new(
        channel: ChannelId,
        author: impl Into<String>,
        text: impl Into<String>,
        ts: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel,
            author: author.into(),
            text: text.into(),
            ts,
            deleted: false,
        }
    }

    /// Case-folded key used for rate buckets and detector scans.
    pub fn author_key(&self) -> String {
        author_key(&self.author)
    }

    pub fn fingerprint(&self) -> ContentFingerprint {
        fingerprint(&self.text)
    }
}

/// Case-fold an author name; blank input collapses to the anonymous
/// sentinel.
pub fn author_key(author: &str) -> String {
    let folded = author.trim().to_lowercase();
    if folded.is_empty() {
        ANON_AUTHOR.to_string()
    } else {
        folded
    }
}

/// Trim and bound message text. `None` when nothing is left after trimming.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() > MAX_TEXT_CHARS {
        Some(trimmed.chars().take(MAX_TEXT_CHARS).collect())
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalized content fingerprint: blake3 over the case-folded, trimmed
/// text. Two messages that differ only in case or surrounding whitespace
/// hash the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint([u8; 32]);

pub fn fingerprint(text: &str) -> ContentFingerprint {
    let normalized = text.trim().to_lowercase();
    ContentFingerprint(*blake3::hash(normalized.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_trims_and_rejects_empty() {
        assert_eq!(clean_text("  hi  "), Some("hi".to_string()));
        assert_eq!(clean_text("   "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn clean_text_truncates_long_input() {
        let long: String = std::iter::repeat('x').take(MAX_TEXT_CHARS + 50).collect();
        let cleaned = clean_text(&long).expect("non-empty");
        assert_eq!(cleaned.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn author_key_folds_and_defaults() {
        assert_eq!(author_key("  Alice "), "alice");
        assert_eq!(author_key(""), ANON_AUTHOR);
        assert_eq!(author_key("   "), ANON_AUTHOR);
    }

    #[test]
    fn fingerprint_ignores_case_and_padding() {
        assert_eq!(fingerprint("Hello World"), fingerprint("  hello world "));
        assert_ne!(fingerprint("hello"), fingerprint("hello!"));
    }

    #[test]
    fn new_messages_get_unique_ids() {
        let channel = ChannelId::normalize("wtf");
        let a = Message::new(channel.clone(), "alice", "hi", 1);
        let b = Message::new(channel, "alice", "hi", 1);
        assert_ne!(a.id, b.id);
        assert!(!a.deleted);
    }
}
