use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;

/// Small key/value table for operational flags, currently the global
/// volume breaker's snapshot.
#[derive(Clone)]
pub struct FlagStore {
    pool: PgPool,
}

impl FlagStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        let value = sqlx::query_scalar::<_, Value>(
            "SELECT value FROM gateway_flags WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn put(&self, name: &str, value: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gateway_flags (name, value)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
