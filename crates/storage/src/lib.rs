//! Postgres access for the gateway: connection setup, the message
//! repository, and the operational flag store.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

pub mod flags;
pub mod messages;

pub use flags::FlagStore;
pub use messages::MessageRepository;
pub use sqlx::PgPool;

const MAX_CONNECTIONS: u32 = 5;

/// Open the shared connection pool. `PgPool` is already a cheap-clone
/// handle, so repositories hold it directly.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await
        .context("failed to open the database connection pool")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::migrate::Migrator;

    static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

    fn test_database_url() -> Option<String> {
        std::env::var("CH4TGATE_TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()
    }

    #[test]
    fn discovers_migrations() {
        assert!(
            !MIGRATOR.migrations.is_empty(),
            "expected at least one migration"
        );
    }

    #[tokio::test]
    async fn migrations_apply_when_database_available() -> Result<()> {
        let Some(database_url) = test_database_url() else {
            eprintln!("skipping migration smoke test: set CH4TGATE_TEST_DATABASE_URL or DATABASE_URL");
            return Ok(());
        };

        let pool = connect(&database_url).await?;
        MIGRATOR
            .run(&pool)
            .await
            .context("running SQLx migrations failed")?;
        Ok(())
    }
}
