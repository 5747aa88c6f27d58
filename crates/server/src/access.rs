use ch4tgate_core::{author_key, ChannelId, DenyCode, ANON_AUTHOR};

use crate::auth::Caller;

/// A permitted write: the channel plus the author name the message will be
/// stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteGrant {
    pub channel: ChannelId,
    pub effective_author: String,
}

/// Public channels are world-readable; whisper channels only open to their
/// two verified participants.
pub fn check_read(caller: &Caller, channel: &ChannelId) -> Result<(), DenyCode> {
    if !channel.is_dm() {
        return Ok(());
    }
    let Caller::Verified(nick) = caller else {
        return Err(DenyCode::AuthRequired);
    };
    if is_participant(channel, nick) {
        Ok(())
    } else {
        Err(DenyCode::DmForbidden)
    }
}

/// Decide whether `caller` may post to `channel` under `requested_author`.
///
/// In a whisper channel the effective author is always the verified
/// identity, whatever the client asked for. In a public channel a named
/// author must be backed by a matching credential; the `anon` sentinel only
/// needs the operator flag.
pub fn check_write(
    caller: &Caller,
    channel: &ChannelId,
    requested_author: &str,
    allow_anon_public: bool,
) -> Result<WriteGrant, DenyCode> {
    if channel.is_dm() {
        let Caller::Verified(nick) = caller else {
            return Err(DenyCode::AuthRequired);
        };
        if !is_participant(channel, nick) {
            return Err(DenyCode::DmForbidden);
        }
        return Ok(WriteGrant {
            channel: channel.clone(),
            effective_author: nick.trim().to_string(),
        });
    }

    let requested_key = author_key(requested_author);
    if requested_key == ANON_AUTHOR {
        if allow_anon_public {
            Ok(WriteGrant {
                channel: channel.clone(),
                effective_author: ANON_AUTHOR.to_string(),
            })
        } else {
            Err(DenyCode::AnonDisabled)
        }
    } else {
        match caller {
            Caller::Anonymous => Err(DenyCode::AuthRequired),
            Caller::Verified(nick) if author_key(nick) == requested_key => Ok(WriteGrant {
                channel: channel.clone(),
                effective_author: requested_author.trim().to_string(),
            }),
            Caller::Verified(_) => Err(DenyCode::AuthorMismatch),
        }
    }
}

fn is_participant(channel: &ChannelId, nick: &str) -> bool {
    match channel.dm_participants() {
        Some((a, b)) => {
            let key = author_key(nick);
            key == a || key == b
        }
        None => false,
    }
}
