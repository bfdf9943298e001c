//! In-memory [`ProgressStore`] for tests and embedders without a database.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::ProgressStore;

/// Progress kept in a `HashMap` behind a `RwLock`. Lost on drop.
pub struct MemoryProgressStore {
    pages: RwLock<HashMap<String, usize>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get_saved_page(&self, document_key: &str) -> Result<Option<usize>> {
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow::anyhow!("progress store lock poisoned"))?;
        Ok(pages.get(document_key).copied())
    }

    async fn save_progress(&self, document_key: &str, page_index: usize) -> Result<()> {
        let mut pages = self
            .pages
            .write()
            .map_err(|_| anyhow::anyhow!("progress store lock poisoned"))?;
        pages.insert(document_key.to_string(), page_index);
        Ok(())
    }
}
