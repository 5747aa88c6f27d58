use serde::Serialize;
use thiserror::Error;

/// Why a write or read was refused. The display form is the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum DenyCode {
    #[error("auth_required")]
    AuthRequired,
    #[error("author_mismatch")]
    AuthorMismatch,
    #[error("dm_forbidden")]
    DmForbidden,
    #[error("anon_disabled")]
    AnonDisabled,
    #[error("rate_limited")]
    RateLimited,
    #[error("global_locked")]
    GlobalLocked,
    #[error("auto_locked_all")]
    AutoLockedAll,
    #[error("text_required")]
    TextRequired,
    #[error("channel_required")]
    ChannelRequired,
}

impl DenyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyCode::AuthRequired => "auth_required",
            DenyCode::AuthorMismatch => "author_mismatch",
            DenyCode::DmForbidden => "dm_forbidden",
            DenyCode::AnonDisabled => "anon_disabled",
            DenyCode::RateLimited => "rate_limited",
            DenyCode::GlobalLocked => "global_locked",
            DenyCode::AutoLockedAll => "auto_locked_all",
            DenyCode::TextRequired => "text_required",
            DenyCode::ChannelRequired => "channel_required",
        }
    }

    /// True when the caller may usefully retry after backoff.
    pub fn retryable(&self) -> bool {
        matches!(self, DenyCode::RateLimited)
    }
}

/// Non-standard acceptance: the message existed transiently and was
/// intentionally removed by the flood or duplicate rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PurgeReason {
    #[serde(rename = "deleted_sequence")]
    Sequence,
    #[serde(rename = "deleted_duplicates")]
    Duplicates,
}

impl PurgeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeReason::Sequence => "deleted_sequence",
            PurgeReason::Duplicates => "deleted_duplicates",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_codes_render_their_wire_strings() {
        assert_eq!(DenyCode::AuthRequired.to_string(), "auth_required");
        assert_eq!(DenyCode::AutoLockedAll.as_str(), "auto_locked_all");
        assert_eq!(
            serde_json::to_string(&DenyCode::DmForbidden).unwrap(),
            "\"dm_forbidden\""
        );
    }

    #[test]
    fn purge_reasons_render_their_wire_strings() {
        assert_eq!(PurgeReason::Sequence.as_str(), "deleted_sequence");
        assert_eq!(
            serde_json::to_string(&PurgeReason::Duplicates).unwrap(),
            "\"deleted_duplicates\""
        );
    }

    #[test]
    fn only_rate_limiting_is_retryable() {
        assert!(DenyCode::RateLimited.retryable());
        assert!(!DenyCode::GlobalLocked.retryable());
        assert!(!DenyCode::AuthRequired.retryable());
    }
}
