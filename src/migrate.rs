use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Used by `pagewise init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per document; the page index is kept as plain text.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_progress (
            document_key TEXT PRIMARY KEY,
            page_index TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
