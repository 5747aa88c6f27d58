use ch4tgate_core::{Message, PurgeReason};

use crate::config::AbuseConfig;

/// Outcome of a detector pass: the rows to soft-delete and the reported
/// reason. The triggering message is always included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purge {
    pub reason: PurgeReason,
    pub ids: Vec<String>,
}

/// Inspect a channel's recent history after `written` was appended.
///
/// `window` is the store's bounded lookback in stored (ascending) order and
/// is expected to contain the just-written row; anything stored after it is
/// ignored so a concurrent writer cannot shift the verdict. The sequence
/// rule is evaluated first; the duplicate rule only runs when it did not
/// fire.
pub fn inspect(config: &AbuseConfig, window: &[Message], written: &Message) -> Option<Purge> {
    let position = window.iter().rposition(|m| m.id == written.id)?;
    let scan = &window[..=position];
    sequential_flood(config, scan, written).or_else(|| duplicate_content(config, scan, written))
}

/// N consecutive same-author messages inside the trailing window, no other
/// author interleaved. The scan walks newest-first and stops at the first
/// break, so its cost is bounded by N.
fn sequential_flood(config: &AbuseConfig, scan: &[Message], written: &Message) -> Option<Purge> {
    let author = written.author_key();
    let floor_ts = written.ts - config.flood_window_ms;

    let mut ids = Vec::new();
    for message in scan.iter().rev() {
        if message.author_key() != author || message.ts < floor_ts {
            break;
        }
        ids.push(message.id.clone());
        if ids.len() == config.flood_count {
            break;
        }
    }

    if ids.len() >= config.flood_count {
        Some(Purge {
            reason: PurgeReason::Sequence,
            ids,
        })
    } else {
        None
    }
}

/// M same-author messages with an identical normalized fingerprint inside
/// the trailing window. Interleaved authors do not break this scan; the
/// window edge does.
fn duplicate_content(config: &AbuseConfig, scan: &[Message], written: &Message) -> Option<Purge> {
    let author = written.author_key();
    let print = written.fingerprint();
    let floor_ts = written.ts - config.duplicate_window_ms;

    let mut ids = Vec::new();
    for message in scan.iter().rev() {
        if message.ts < floor_ts {
            break;
        }
        if message.author_key() == author && message.fingerprint() == print {
            ids.push(message.id.clone());
        }
    }

    if ids.len() >= config.duplicate_count {
        Some(Purge {
            reason: PurgeReason::Duplicates,
            ids,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ch4tgate_core::ChannelId;

    fn config() -> AbuseConfig {
        AbuseConfig::default()
    }

    fn message(author: &str, text: &str, ts: i64) -> Message {
        Message::new(ChannelId::normalize("wtf"), author, text, ts)
    }

    fn run_of(author: &str, count: usize, start_ts: i64, gap_ms: i64) -> Vec<Message> {
        (0..count)
            .map(|i| message(author, &format!("msg {i}"), start_ts + i as i64 * gap_ms))
            .collect()
    }

    #[test]
    fn ten_rapid_posts_purge_the_whole_run() {
        let window = run_of("alice", 10, 1_000, 100);
        let written = window.last().cloned().expect("non-empty");

        let purge = inspect(&config(), &window, &written).expect("purged");
        assert_eq!(purge.reason, PurgeReason::Sequence);
        assert_eq!(purge.ids.len(), 10);
        assert!(purge.ids.contains(&written.id));
    }

    #[test]
    fn nine_posts_are_not_a_flood() {
        let window = run_of("alice", 9, 1_000, 100);
        let written = window.last().cloned().expect("non-empty");
        assert_eq!(inspect(&config(), &window, &written), None);
    }

    #[test]
    fn an_interleaved_author_breaks_the_run() {
        let mut window = run_of("alice", 6, 1_000, 100);
        window.push(message("bob", "hi", 1_650));
        window.extend(run_of("alice", 6, 1_700, 100).into_iter().map(|mut m| {
            m.text = format!("more {}", m.ts);
            m
        }));
        let written = window.last().cloned().expect("non-empty");
        assert_eq!(inspect(&config(), &window, &written), None);
    }

    #[test]
    fn posts_outside_the_flood_window_do_not_count() {
        // Nine stale posts, then the tenth far outside W1 of the first nine.
        let mut window = run_of("alice", 9, 1_000, 100);
        window.push(message("alice", "late", 1_000 + 40_000));
        let written = window.last().cloned().expect("non-empty");
        assert_eq!(inspect(&config(), &window, &written), None);
    }

    #[test]
    fn three_identical_posts_purge_as_duplicates() {
        let window = vec![
            message("alice", "Buy now!", 1_000),
            message("bob", "ignore them", 1_500),
            message("alice", "buy now! ", 2_000),
            message("alice", "BUY NOW!", 3_000),
        ];
        let written = window.last().cloned().expect("non-empty");

        let purge = inspect(&config(), &window, &written).expect("purged");
        assert_eq!(purge.reason, PurgeReason::Duplicates);
        assert_eq!(purge.ids.len(), 3);
        assert!(purge.ids.contains(&written.id));
        // Bob's interleaved message survives.
        assert!(!purge.ids.contains(&window[1].id));
    }

    #[test]
    fn duplicates_outside_the_window_do_not_count() {
        let window = vec![
            message("alice", "spam", 1_000),
            message("alice", "spam", 2_000),
            message("alice", "spam", 2_000 + 11_000),
        ];
        let written = window.last().cloned().expect("non-empty");
        assert_eq!(inspect(&config(), &window, &written), None);
    }

    #[test]
    fn different_text_is_unaffected_by_a_duplicate_burst() {
        let mut window = vec![
            message("alice", "spam", 1_000),
            message("alice", "spam", 1_200),
        ];
        window.push(message("alice", "something new", 1_400));
        let written = window.last().cloned().expect("non-empty");
        assert_eq!(inspect(&config(), &window, &written), None);
    }

    #[test]
    fn the_sequence_rule_wins_when_both_match() {
        let mut tuned = config();
        tuned.flood_count = 3;
        tuned.duplicate_count = 3;

        let window = vec![
            message("alice", "same", 1_000),
            message("alice", "same", 1_100),
            message("alice", "same", 1_200),
        ];
        let written = window.last().cloned().expect("non-empty");

        let purge = inspect(&tuned, &window, &written).expect("purged");
        assert_eq!(purge.reason, PurgeReason::Sequence);
    }

    #[test]
    fn rows_stored_after_the_written_message_are_ignored() {
        let mut window = run_of("alice", 10, 1_000, 100);
        let written = window[8].clone();
        // A concurrent writer landed after ours; it must not count.
        window.push(message("alice", "later", 2_100));
        let purge = inspect(&config(), &window, &written);
        assert_eq!(purge, None);
    }
}
