use anyhow::Result;
use ch4tgate_core::{ChannelId, Message};
use sqlx::{FromRow, PgPool};

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct MessageRow {
    id: String,
    channel: String,
    author: String,
    text: String,
    ts: i64,
    deleted: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            // Legacy rows may carry a denormalized spelling.
            channel: ChannelId::normalize(&row.channel),
            author: row.author,
            text: row.text,
            ts: row.ts,
            deleted: row.deleted,
        }
    }
}

const SELECT_COLUMNS: &str = "id, channel, author, text, ts, deleted";

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, channel, author, text, ts, deleted)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&message.id)
        .bind(message.channel.as_str())
        .bind(&message.author)
        .bind(&message.text)
        .bind(message.ts)
        .bind(message.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Non-deleted messages for a channel, ascending by timestamp. Without a
    /// `since` bound the most recent `limit` rows are returned; with one,
    /// the oldest `limit` rows after it. Every stored spelling in
    /// `variants` is matched so legacy `#`-prefixed rows surface too.
    pub async fn list(
        &self,
        variants: &[String],
        since_exclusive: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows = if let Some(since) = since_exclusive {
            sqlx::query_as::<_, MessageRow>(&format!(
                r#"
                SELECT {SELECT_COLUMNS}
                FROM messages
                WHERE channel = ANY($1) AND deleted = FALSE AND ts > $2
                ORDER BY ts ASC
                LIMIT $3
                "#,
            ))
            .bind(variants)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, MessageRow>(&format!(
                r#"
                SELECT {SELECT_COLUMNS}
                FROM messages
                WHERE channel = ANY($1) AND deleted = FALSE
                ORDER BY ts DESC
                LIMIT $2
                "#,
            ))
            .bind(variants)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .rev()
            .collect()
        };

        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// The detector's bounded lookback: the newest non-deleted rows at or
    /// after `floor_ts`, returned in stored (ascending) order.
    pub async fn recent_window(
        &self,
        variants: &[String],
        floor_ts: i64,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM messages
            WHERE channel = ANY($1) AND deleted = FALSE AND ts >= $2
            ORDER BY ts DESC
            LIMIT $3
            "#,
        ))
        .bind(variants)
        .bind(floor_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().rev().map(Message::from).collect())
    }

    pub async fn soft_delete(&self, ids: &[String]) -> Result<()> {
        sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft-delete every remaining message in the channel. Returns how many
    /// rows were flagged.
    pub async fn clear_channel(&self, variants: &[String]) -> Result<u64> {
        let result =
            sqlx::query("UPDATE messages SET deleted = TRUE WHERE channel = ANY($1) AND deleted = FALSE")
                .bind(variants)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Audit lookup by identifier; soft-deleted rows are returned as-is.
    pub async fn fetch(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM messages WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Message::from))
    }

    pub async fn hard_delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
