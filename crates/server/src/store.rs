use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ch4tgate_core::{ChannelId, Message};
use ch4tgate_storage::{FlagStore, MessageRepository, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::breaker::BreakerSnapshot;

/// Rows returned by `query` when the caller names no limit.
pub const DEFAULT_QUERY_LIMIT: i64 = 200;
/// Hard cap on one query, whatever the caller asks for.
pub const MAX_QUERY_LIMIT: i64 = 500;

const BREAKER_FLAG: &str = "global_volume_breaker";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db_read_failed")]
    Read(#[source] anyhow::Error),
    #[error("db_write_failed")]
    Write(#[source] anyhow::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Read(_) => "db_read_failed",
            StoreError::Write(_) => "db_write_failed",
        }
    }
}

/// Uniform append/query/soft-delete surface over the durable store and the
/// in-process fallback. The admission pipeline never branches on which
/// backend it holds.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: &Message) -> Result<(), StoreError>;

    /// Non-deleted messages ascending by timestamp, capped by the adapter.
    /// Legacy denormalized channel spellings are merged in.
    async fn query(
        &self,
        channel: &ChannelId,
        since_exclusive: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError>;

    /// The detector's bounded lookback: newest rows at or after `floor_ts`,
    /// in stored order.
    async fn recent_window(
        &self,
        channel: &ChannelId,
        floor_ts: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;

    async fn soft_delete(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Soft-delete every remaining message in the channel; returns how many
    /// rows were flagged.
    async fn clear_channel(&self, channel: &ChannelId) -> Result<u64, StoreError>;

    /// Audit lookup by identifier; soft-deleted rows are returned as-is.
    async fn fetch(&self, id: &str) -> Result<Option<Message>, StoreError>;

    async fn hard_delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>, StoreError>;

    async fn store_breaker(&self, snapshot: &BreakerSnapshot) -> Result<(), StoreError>;
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
}

/// Postgres-backed adapter.
pub struct DurableStore {
    messages: MessageRepository,
    flags: FlagStore,
}

impl DurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            messages: MessageRepository::new(pool.clone()),
            flags: FlagStore::new(pool),
        }
    }
}

#[async_trait]
impl MessageStore for DurableStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.insert(message).await.map_err(StoreError::Write)
    }

    async fn query(
        &self,
        channel: &ChannelId,
        since_exclusive: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        self.messages
            .list(&channel.variants(), since_exclusive, clamp_limit(limit))
            .await
            .map_err(StoreError::Read)
    }

    async fn recent_window(
        &self,
        channel: &ChannelId,
        floor_ts: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        self.messages
            .recent_window(&channel.variants(), floor_ts, limit)
            .await
            .map_err(StoreError::Read)
    }

    async fn soft_delete(&self, ids: &[String]) -> Result<(), StoreError> {
        self.messages.soft_delete(ids).await.map_err(StoreError::Write)
    }

    async fn clear_channel(&self, channel: &ChannelId) -> Result<u64, StoreError> {
        self.messages
            .clear_channel(&channel.variants())
            .await
            .map_err(StoreError::Write)
    }

    async fn fetch(&self, id: &str) -> Result<Option<Message>, StoreError> {
        self.messages.fetch(id).await.map_err(StoreError::Read)
    }

    async fn hard_delete(&self, id: &str) -> Result<bool, StoreError> {
        self.messages.hard_delete(id).await.map_err(StoreError::Write)
    }

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>, StoreError> {
        match self.flags.get(BREAKER_FLAG).await.map_err(StoreError::Read)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| StoreError::Read(err.into())),
            None => Ok(None),
        }
    }

    async fn store_breaker(&self, snapshot: &BreakerSnapshot) -> Result<(), StoreError> {
        let value = serde_json::to_value(snapshot).map_err(|err| StoreError::Write(err.into()))?;
        self.flags
            .put(BREAKER_FLAG, &value)
            .await
            .map_err(StoreError::Write)
    }
}

/// In-process fallback used when no `database_url` is configured:
/// per-channel append-only lists plus a global soft-deleted id set.
/// Everything vanishes with the process.
#[derive(Default)]
pub struct InMemoryStore {
    channels: RwLock<HashMap<String, Vec<Message>>>,
    deleted: RwLock<HashSet<String>>,
    breaker: RwLock<Option<BreakerSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self, channel: &ChannelId) -> Vec<Message> {
        let channels = self.channels.read().await;
        let deleted = self.deleted.read().await;
        let mut merged: Vec<Message> = Vec::new();
        let mut seen = HashSet::new();
        for variant in channel.variants() {
            if let Some(list) = channels.get(&variant) {
                for message in list {
                    if deleted.contains(&message.id) || message.deleted {
                        continue;
                    }
                    if seen.insert(message.id.clone()) {
                        merged.push(message.clone());
                    }
                }
            }
        }
        merged.sort_by_key(|m| m.ts);
        merged
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        self.channels
            .write()
            .await
            .entry(message.channel.as_str().to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn query(
        &self,
        channel: &ChannelId,
        since_exclusive: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = clamp_limit(limit) as usize;
        let mut messages = self.collect(channel).await;
        match since_exclusive {
            Some(since) => {
                messages.retain(|m| m.ts > since);
                messages.truncate(limit);
            }
            None => {
                if messages.len() > limit {
                    messages = messages.split_off(messages.len() - limit);
                }
            }
        }
        Ok(messages)
    }

    async fn recent_window(
        &self,
        channel: &ChannelId,
        floor_ts: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.collect(channel).await;
        messages.retain(|m| m.ts >= floor_ts);
        let limit = limit.max(0) as usize;
        if messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }
        Ok(messages)
    }

    async fn soft_delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut deleted = self.deleted.write().await;
        for id in ids {
            deleted.insert(id.clone());
        }
        Ok(())
    }

    async fn clear_channel(&self, channel: &ChannelId) -> Result<u64, StoreError> {
        let remaining = self.collect(channel).await;
        let count = remaining.len() as u64;
        let mut deleted = self.deleted.write().await;
        for message in remaining {
            deleted.insert(message.id);
        }
        Ok(count)
    }

    async fn fetch(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let channels = self.channels.read().await;
        let deleted = self.deleted.read().await;
        for list in channels.values() {
            if let Some(message) = list.iter().find(|m| m.id == id) {
                let mut found = message.clone();
                found.deleted = found.deleted || deleted.contains(id);
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn hard_delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut channels = self.channels.write().await;
        for list in channels.values_mut() {
            if let Some(index) = list.iter().position(|m| m.id == id) {
                list.remove(index);
                self.deleted.write().await.remove(id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>, StoreError> {
        Ok(*self.breaker.read().await)
    }

    async fn store_breaker(&self, snapshot: &BreakerSnapshot) -> Result<(), StoreError> {
        *self.breaker.write().await = Some(*snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelId {
        ChannelId::normalize("wtf")
    }

    fn message(text: &str, ts: i64) -> Message {
        Message::new(channel(), "alice", text, ts)
    }

    #[tokio::test]
    async fn query_orders_and_filters_soft_deleted_rows() {
        let store = InMemoryStore::new();
        let first = message("one", 100);
        let second = message("two", 200);
        let third = message("three", 300);
        for m in [&second, &first, &third] {
            store.append(m).await.expect("append");
        }

        store
            .soft_delete(std::slice::from_ref(&second.id))
            .await
            .expect("soft delete");

        let listed = store.query(&channel(), None, None).await.expect("query");
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), third.id.as_str()]);
    }

    #[tokio::test]
    async fn since_filter_is_exclusive() {
        let store = InMemoryStore::new();
        for ts in [100, 200, 300] {
            store.append(&message("m", ts)).await.expect("append");
        }
        let listed = store
            .query(&channel(), Some(200), None)
            .await
            .expect("query");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].ts, 300);
    }

    #[tokio::test]
    async fn limits_are_capped_and_default_to_the_newest_rows() {
        let store = InMemoryStore::new();
        for ts in 0..250 {
            store.append(&message("m", ts)).await.expect("append");
        }
        let listed = store.query(&channel(), None, None).await.expect("query");
        assert_eq!(listed.len(), DEFAULT_QUERY_LIMIT as usize);
        assert_eq!(listed.last().map(|m| m.ts), Some(249));

        let capped = store
            .query(&channel(), None, Some(10_000))
            .await
            .expect("query");
        assert_eq!(capped.len(), 250);
    }

    #[tokio::test]
    async fn fetch_returns_soft_deleted_rows_for_audit() {
        let store = InMemoryStore::new();
        let m = message("gone", 100);
        store.append(&m).await.expect("append");
        store
            .soft_delete(std::slice::from_ref(&m.id))
            .await
            .expect("soft delete");

        let fetched = store.fetch(&m.id).await.expect("fetch").expect("found");
        assert!(fetched.deleted);
        assert_eq!(fetched.text, "gone");

        assert!(store.query(&channel(), None, None).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn clear_channel_flags_every_remaining_row() {
        let store = InMemoryStore::new();
        for ts in [1, 2, 3] {
            store.append(&message("m", ts)).await.expect("append");
        }
        let cleared = store.clear_channel(&channel()).await.expect("clear");
        assert_eq!(cleared, 3);
        assert!(store.query(&channel(), None, None).await.expect("query").is_empty());
        // A second clear has nothing left to flag.
        assert_eq!(store.clear_channel(&channel()).await.expect("clear"), 0);
    }

    #[tokio::test]
    async fn hard_delete_erases_the_row() {
        let store = InMemoryStore::new();
        let m = message("m", 1);
        store.append(&m).await.expect("append");
        assert!(store.hard_delete(&m.id).await.expect("hard delete"));
        assert_eq!(store.fetch(&m.id).await.expect("fetch"), None);
        assert!(!store.hard_delete(&m.id).await.expect("hard delete"));
    }

    #[tokio::test]
    async fn recent_window_respects_floor_and_limit() {
        let store = InMemoryStore::new();
        for ts in [100, 200, 300, 400] {
            store.append(&message("m", ts)).await.expect("append");
        }
        let window = store
            .recent_window(&channel(), 200, 2)
            .await
            .expect("window");
        let stamps: Vec<_> = window.iter().map(|m| m.ts).collect();
        assert_eq!(stamps, vec![300, 400]);
    }

    #[tokio::test]
    async fn breaker_snapshot_round_trips() {
        let store = InMemoryStore::new();
        assert_eq!(store.load_breaker().await.expect("load"), None);
        let snapshot = BreakerSnapshot {
            slot: 3,
            count: 17,
            locked: true,
        };
        store.store_breaker(&snapshot).await.expect("store");
        assert_eq!(store.load_breaker().await.expect("load"), Some(snapshot));
    }
}
