//! The boundary the viewer talks to.
//!
//! A [`Reader`] bundles the configuration with its three collaborators: the
//! cancelable [`DocumentLoader`], a [`ProgressStore`] and a [`Generator`].
//! All of them are injected, so embedders and tests can swap any one.

use std::sync::Arc;

use pagewise_core::models::{Document, ReadingProgress};
use pagewise_core::store::ProgressStore;
use tracing::info;

use crate::config::Config;
use crate::error::ReaderError;
use crate::generator::Generator;
use crate::loader::DocumentLoader;
use crate::session::ConversationSession;

pub struct Reader {
    config: Config,
    loader: DocumentLoader,
    progress: Arc<dyn ProgressStore>,
    generator: Arc<dyn Generator>,
}

impl Reader {
    pub fn new(
        config: Config,
        progress: Arc<dyn ProgressStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let loader = DocumentLoader::new(config.epub.clone());
        Self {
            config,
            loader,
            progress,
            generator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse an uploaded file. `Ok(None)` means a later call superseded it.
    pub async fn open_document(
        &self,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        file_name: &str,
    ) -> Result<Option<Arc<Document>>, ReaderError> {
        let loaded = self.loader.load(bytes, declared_mime, file_name).await?;
        Ok(loaded.map(|document| {
            info!(
                file = %document.file_name,
                kind = %document.kind,
                pages = document.page_count(),
                outline = document.outline().len(),
                "document opened"
            );
            Arc::new(document)
        }))
    }

    pub async fn get_saved_page(&self, document_key: &str) -> Result<Option<usize>, ReaderError> {
        Ok(self.progress.get_saved_page(document_key).await?)
    }

    /// The page to show when `document` opens: the saved page clamped into
    /// range, or the first page.
    pub async fn restore_page(&self, document: &Document) -> Result<usize, ReaderError> {
        let saved = self.get_saved_page(document.document_key()).await?;
        Ok(saved.map(|p| document.clamp_page(p)).unwrap_or(0))
    }

    pub async fn save_progress(
        &self,
        document: &Document,
        page_index: usize,
    ) -> Result<ReadingProgress, ReaderError> {
        if page_index >= document.page_count() {
            return Err(ReaderError::PageOutOfRange {
                page_index,
                page_count: document.page_count(),
            });
        }
        self.progress
            .save_progress(document.document_key(), page_index)
            .await?;
        Ok(ReadingProgress {
            document_key: document.document_key().to_string(),
            page_index,
        })
    }

    pub fn start_session(&self, document: Arc<Document>, page_index: usize) -> ConversationSession {
        ConversationSession::new(
            document,
            Arc::clone(&self.generator),
            self.config.session.clone(),
            page_index,
        )
    }
}
