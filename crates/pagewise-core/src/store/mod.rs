//! Reading-progress storage abstraction.
//!
//! The [`ProgressStore`] trait persists one integer per document: the index
//! of the last viewed page. Backends are injected into the reader rather
//! than reached through globals.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// Durable key-value store of last-viewed page indices.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_saved_page`](ProgressStore::get_saved_page) | Read the saved page for a document key |
/// | [`save_progress`](ProgressStore::save_progress) | Create or overwrite the saved page |
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Returns the saved page index, or `None` if nothing was stored.
    async fn get_saved_page(&self, document_key: &str) -> Result<Option<usize>>;

    /// Create or overwrite the saved page index for `document_key`.
    async fn save_progress(&self, document_key: &str, page_index: usize) -> Result<()>;
}
