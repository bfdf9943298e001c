//! Error taxonomy for the reader boundary.
//!
//! Every failure stays local to the operation that raised it: a bad file
//! never touches an open document, and a failed generation only rewrites
//! the assistant turn it belongs to.

use thiserror::Error;

/// Errors surfaced to the viewer by [`crate::reader::Reader`] and the parsers.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Neither a PDF nor an EPUB, judging by MIME type, extension and signature.
    #[error("unsupported file format: {0}. Open a PDF or EPUB file")]
    UnsupportedFormat(String),

    /// The container was recognised but could not be read.
    #[error("could not parse {kind} file: {message}. Make sure it is a valid PDF or EPUB")]
    ParseFailure { kind: &'static str, message: String },

    /// A page index outside `0..page_count`.
    #[error("page index {page_index} is out of range for a document with {page_count} pages")]
    PageOutOfRange {
        page_index: usize,
        page_count: usize,
    },

    /// A newer open request superseded this parse before it finished.
    #[error("parse cancelled")]
    Cancelled,

    #[error("reading progress storage failed: {0}")]
    Progress(#[from] anyhow::Error),
}

impl ReaderError {
    pub(crate) fn pdf(message: impl ToString) -> Self {
        ReaderError::ParseFailure {
            kind: "PDF",
            message: message.to_string(),
        }
    }

    pub(crate) fn epub(message: impl ToString) -> Self {
        ReaderError::ParseFailure {
            kind: "EPUB",
            message: message.to_string(),
        }
    }
}

/// Failures of a single text-generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generation is disabled in the configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("no output from the generator for {0} seconds")]
    Timeout(u64),

    #[error("malformed stream: {0}")]
    Stream(String),
}

/// Caller errors on a conversation session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A reply is still streaming; the viewer should keep input disabled.
    #[error("a reply is already in progress")]
    Busy,

    /// The session was torn down.
    #[error("the conversation session is closed")]
    Closed,
}
