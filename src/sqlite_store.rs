//! SQLite-backed [`ProgressStore`].
//!
//! Each document key maps to one row of `reading_progress`. The page index
//! is written as decimal text; a value that no longer parses reads back as
//! "no saved page" rather than an error.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use pagewise_core::store::ProgressStore;

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    /// Wrap an open pool whose schema is already in place.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the table exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get_saved_page(&self, document_key: &str) -> Result<Option<usize>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT page_index FROM reading_progress WHERE document_key = ?")
                .bind(document_key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.and_then(|raw| match raw.trim().parse::<usize>() {
            Ok(page) => Some(page),
            Err(_) => {
                warn!(document = document_key, value = %raw, "ignoring unreadable saved page");
                None
            }
        }))
    }

    async fn save_progress(&self, document_key: &str, page_index: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reading_progress (document_key, page_index, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(document_key) DO UPDATE SET
                page_index = excluded.page_index,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_key)
        .bind(page_index.to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(document = document_key, page_index, "progress saved");
        Ok(())
    }
}
