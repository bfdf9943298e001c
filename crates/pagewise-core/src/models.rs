//! Core data models for documents, reading progress and chat turns.
//!
//! A [`Document`] is built once by a parser and is read-only afterwards: its
//! page texts are the only data the assistant may ever see, and only through
//! [`crate::context::build_context`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text of the placeholder page reported for documents that produced no pages.
pub const NO_CONTENT_PAGE: &str = "No readable content was found in this document.";

/// The two supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Epub,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Epub => "epub",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renderable payload for a single page.
///
/// Opaque to the core. The viewer decides how to paint it.
#[derive(Debug, Clone)]
pub enum RenderUnit {
    /// A page of the original PDF. `source` is the unmodified input file,
    /// shared by every page of the document; `page_number` is 1-based.
    PdfPage { source: Arc<[u8]>, page_number: u32 },
    /// Serialized body markup of an EPUB content document, with images inlined.
    Markup(String),
    /// Stand-in for the placeholder page of an empty document.
    Empty,
}

/// One navigation entry. `page_index` always points at an existing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    pub page_index: usize,
    pub level: usize,
}

/// Text and render payload of one page, as produced by a parser.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub text: String,
    pub render: RenderUnit,
}

/// A parsed document.
///
/// Pages and render units are kept in 1:1 correspondence and there is always
/// at least one page.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub file_name: String,
    pub kind: DocumentKind,
    pages: Vec<String>,
    render_payload: Vec<RenderUnit>,
    outline: Vec<OutlineEntry>,
}

impl Document {
    /// Assemble a document from parsed pages.
    ///
    /// An empty page list is replaced by a single [`NO_CONTENT_PAGE`]; outline
    /// entries that point past the last page are dropped.
    pub fn new(
        title: impl Into<String>,
        file_name: impl Into<String>,
        kind: DocumentKind,
        pages: Vec<PageContent>,
        outline: Vec<OutlineEntry>,
    ) -> Self {
        let pages = if pages.is_empty() {
            vec![PageContent {
                text: NO_CONTENT_PAGE.to_string(),
                render: RenderUnit::Empty,
            }]
        } else {
            pages
        };

        let page_count = pages.len();
        let (texts, render_payload): (Vec<String>, Vec<RenderUnit>) =
            pages.into_iter().map(|p| (p.text, p.render)).unzip();
        let outline = outline
            .into_iter()
            .filter(|entry| entry.page_index < page_count)
            .collect();

        Self {
            title: title.into(),
            file_name: file_name.into(),
            kind,
            pages: texts,
            render_payload,
            outline,
        }
    }

    /// Plain text of every page, in reading order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn render_payload(&self) -> &[RenderUnit] {
        &self.render_payload
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Identity used to key reading progress.
    pub fn document_key(&self) -> &str {
        &self.file_name
    }

    /// Clamp an arbitrary index into `0..page_count`.
    pub fn clamp_page(&self, page_index: usize) -> usize {
        page_index.min(self.pages.len() - 1)
    }
}

/// Last viewed page of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub document_key: String,
    pub page_index: usize,
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label used when the turn is written into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One message in the conversation log.
///
/// Only an assistant turn can stream. While it streams its text may be
/// replaced; once finished it never changes again.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub id: String,
    pub role: Role,
    text: String,
    pub created_at: DateTime<Utc>,
    is_streaming: bool,
}

impl ChatTurn {
    fn new(role: Role, text: String, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text,
            created_at: Utc::now(),
            is_streaming,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into(), false)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text.into(), false)
    }

    /// A finished assistant turn, e.g. when restoring a transcript.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into(), false)
    }

    /// An empty assistant turn waiting for generator output.
    pub fn assistant_streaming() -> Self {
        Self::new(Role::Assistant, String::new(), true)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Replace the visible text with a newer cumulative snapshot.
    ///
    /// Returns `false` (and changes nothing) once the turn is finished.
    pub fn replace_text(&mut self, snapshot: &str) -> bool {
        if !self.is_streaming {
            return false;
        }
        self.text.clear();
        self.text.push_str(snapshot);
        true
    }

    /// Freeze the turn, optionally overwriting its text first.
    pub fn finish(&mut self, final_text: Option<String>) {
        if !self.is_streaming {
            return;
        }
        if let Some(text) = final_text {
            self.text = text;
        }
        self.is_streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageContent {
        PageContent {
            text: text.to_string(),
            render: RenderUnit::Markup(format!("<p>{}</p>", text)),
        }
    }

    #[test]
    fn empty_document_gets_placeholder_page() {
        let doc = Document::new("t", "t.epub", DocumentKind::Epub, vec![], vec![]);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.pages()[0], NO_CONTENT_PAGE);
        assert_eq!(doc.render_payload().len(), 1);
        assert_eq!(doc.clamp_page(10), 0);
    }

    #[test]
    fn outline_entries_past_last_page_are_dropped() {
        let outline = vec![
            OutlineEntry {
                title: "One".into(),
                page_index: 0,
                level: 0,
            },
            OutlineEntry {
                title: "Ghost".into(),
                page_index: 5,
                level: 0,
            },
        ];
        let doc = Document::new(
            "t",
            "t.epub",
            DocumentKind::Epub,
            vec![page("a"), page("b")],
            outline,
        );
        assert_eq!(doc.outline().len(), 1);
        assert_eq!(doc.outline()[0].title, "One");
        assert_eq!(doc.render_payload().len(), doc.page_count());
    }

    #[test]
    fn finished_turn_is_frozen() {
        let mut turn = ChatTurn::assistant_streaming();
        assert!(turn.replace_text("Hel"));
        turn.finish(None);
        assert!(!turn.replace_text("Hello"));
        turn.finish(Some("other".into()));
        assert_eq!(turn.text(), "Hel");
        assert!(!turn.is_streaming());
    }
}
