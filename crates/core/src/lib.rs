//! Core domain types: channel canonicalization, the message record, and the
//! admission outcome vocabulary.

pub mod channel;
pub mod message;
pub mod outcome;

pub use channel::ChannelId;
pub use message::{
    author_key, clean_text, fingerprint, ContentFingerprint, Message, ANON_AUTHOR, MAX_TEXT_CHARS,
};
pub use outcome::{DenyCode, PurgeReason};
