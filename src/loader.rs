//! Cancelable document loading.
//!
//! Parsing runs on the blocking pool. Each [`DocumentLoader::load`] call
//! takes a ticket and cancels the parse started by the previous one, so only
//! the most recent submission can ever deliver a document.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pagewise_core::models::Document;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EpubConfig;
use crate::error::ReaderError;
use crate::extract::parse_document;

pub struct DocumentLoader {
    epub_config: EpubConfig,
    generation: Arc<AtomicU64>,
    current: Mutex<CancellationToken>,
}

impl DocumentLoader {
    pub fn new(epub_config: EpubConfig) -> Self {
        Self {
            epub_config,
            generation: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start parsing `bytes`, superseding any load still in progress.
    ///
    /// The ticket is taken when this is called, not when the future is first
    /// polled. Resolves to `Ok(None)` if a later call superseded this one.
    pub fn load(
        &self,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        file_name: &str,
    ) -> impl Future<Output = Result<Option<Document>, ReaderError>> + Send + 'static {
        let (ticket, token) = self.supersede();

        let generation = Arc::clone(&self.generation);
        let config = self.epub_config.clone();
        let mime = declared_mime.map(str::to_string);
        let name = file_name.to_string();

        async move {
            let parse_token = token.clone();
            let parse_name = name.clone();
            let result = tokio::task::spawn_blocking(move || {
                parse_document(bytes, mime.as_deref(), &parse_name, &config, &parse_token)
            })
            .await
            .map_err(|e| ReaderError::ParseFailure {
                kind: "document",
                message: e.to_string(),
            })?;

            if generation.load(Ordering::SeqCst) != ticket {
                debug!(file = %name, ticket, "superseded load discarded");
                return Ok(None);
            }
            match result {
                Ok(document) => Ok(Some(document)),
                Err(ReaderError::Cancelled) => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    /// Abandon the load in progress, if any.
    pub fn cancel(&self) {
        self.supersede();
    }

    fn supersede(&self) -> (u64, CancellationToken) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *current = token.clone();
        (ticket, token)
    }
}
