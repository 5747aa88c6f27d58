use std::fmt;

use serde::{Deserialize, Serialize};

const DM_PREFIX: &str = "dm:";

/// A normalized channel identity: a public channel name, or a whisper
/// channel in the canonical `dm:a|b` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Canonicalize a raw channel name: trim whitespace, strip leading `#`s,
    /// case-fold. A `dm:` input has its participant pair re-canonicalized so
    /// the same two nicknames always map to one id. The result may be empty;
    /// callers must reject empty ids.
    pub fn normalize(raw: &str) -> Self {
        let folded = raw.trim().to_lowercase();
        if let Some(pair) = folded.strip_prefix(DM_PREFIX) {
            let (a, b) = match pair.split_once('|') {
                Some((a, b)) => (a, b),
                None => (pair, ""),
            };
            return Self::dm(a, b);
        }
        let name = folded.trim_start_matches('#').trim_start();
        Self(name.to_string())
    }

    /// Canonical whisper channel for two participants. Commutative and
    /// idempotent: `dm(a, b) == dm(b, a)` and normalizing the output is a
    /// no-op.
    pub fn dm(a: &str, b: &str) -> Self {
        let mut a = a.trim().to_lowercase();
        let mut b = b.trim().to_lowercase();
        if b < a {
            std::mem::swap(&mut a, &mut b);
        }
        Self(format!("{DM_PREFIX}{a}|{b}"))
    }

    pub fn is_dm(&self) -> bool {
        self.0.starts_with(DM_PREFIX)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The two canonical participants of a whisper channel.
    pub fn dm_participants(&self) -> Option<(&str, &str)> {
        self.0.strip_prefix(DM_PREFIX)?.split_once('|')
    }

    /// Equivalent stored spellings of this channel. Legacy rows kept the
    /// leading `#`, so adapters query every variant and merge.
    pub fn variants(&self) -> Vec<String> {
        if self.is_dm() || self.is_empty() {
            vec![self.0.clone()]
        } else {
            vec![self.0.clone(), format!("#{}", self.0)]
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.0
    }
}
