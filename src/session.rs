//! Conversation session.
//!
//! A session pairs one open [`Document`] with an ordered list of
//! [`ChatTurn`]s. It is the only writer of that list. At most one reply is
//! in flight: [`ConversationSession::submit`] appends the user turn and an
//! empty streaming assistant turn, and the caller then drives the reply with
//! [`ConversationSession::next_event`] (or consumes
//! [`ConversationSession::submit_turn`] as a stream).
//!
//! ```text
//!            submit                 stream ends / fails
//!   Idle ─────────────▶ Awaiting ───────────────────────▶ Idle
//!     │                    │
//!     └──── close() ───────┴──────────────▶ Closed
//! ```
//!
//! Every snapshot replaces the assistant turn's text. Closing the session,
//! or cancelling its [`CancellationToken`] from elsewhere, drops the
//! in-flight stream; no turn changes after that.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use pagewise_core::models::{ChatTurn, Document};
use pagewise_core::prompt::build_request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{GenerationError, SessionError};
use crate::generator::{Generator, SnapshotStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Awaiting,
    Closed,
}

/// Progress of the in-flight reply.
#[derive(Debug)]
pub enum ReplyEvent {
    /// The assistant turn now reads exactly this text.
    Snapshot(String),
    /// The reply completed with this final text.
    Finished(String),
    /// The generator failed. The assistant turn holds the fallback message.
    Failed(GenerationError),
}

pub struct ConversationSession {
    document: Arc<Document>,
    generator: Arc<dyn Generator>,
    settings: SessionConfig,
    current_page: usize,
    turns: Vec<ChatTurn>,
    in_flight: Option<SnapshotStream>,
    cancel: CancellationToken,
    closed: bool,
}

impl ConversationSession {
    pub fn new(
        document: Arc<Document>,
        generator: Arc<dyn Generator>,
        settings: SessionConfig,
        current_page: usize,
    ) -> Self {
        let current_page = document.clamp_page(current_page);
        Self {
            document,
            generator,
            settings,
            current_page,
            turns: Vec::new(),
            in_flight: None,
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    /// Continue from an existing transcript, e.g. one shown before a reload.
    /// Turns that were still streaming are finished as they stand.
    pub fn with_turns(mut self, mut turns: Vec<ChatTurn>) -> Self {
        for turn in &mut turns {
            turn.finish(None);
        }
        self.turns = turns;
        self
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Move the reading position used by later submits. Earlier turns are
    /// never re-answered.
    pub fn set_current_page(&mut self, page_index: usize) -> usize {
        self.current_page = self.document.clamp_page(page_index);
        self.current_page
    }

    pub fn state(&self) -> SessionState {
        if self.closed || self.cancel.is_cancelled() {
            SessionState::Closed
        } else if self.in_flight.is_some() {
            SessionState::Awaiting
        } else {
            SessionState::Idle
        }
    }

    /// Token that tears the session down when cancelled.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a reply to `text`.
    ///
    /// Fails with [`SessionError::Busy`] while a reply is in flight, leaving
    /// the turn list untouched.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.in_flight.is_some() {
            return Err(SessionError::Busy);
        }

        let text = text.into();
        let request = build_request(
            self.document.pages(),
            self.current_page,
            &self.turns,
            &text,
            self.settings.history_turns,
        );

        self.turns.push(ChatTurn::user(text));
        let reply = ChatTurn::assistant_streaming();
        info!(
            document = %self.document.document_key(),
            page = self.current_page + 1,
            turn = %reply.id,
            generator = self.generator.name(),
            "submitting question"
        );
        self.turns.push(reply);
        self.in_flight = Some(self.generator.generate(request));
        Ok(())
    }

    /// Wait for the next change to the in-flight reply.
    ///
    /// Returns `None` when nothing is in flight or the session was torn down
    /// while waiting.
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        if self.ensure_open().is_err() {
            return None;
        }
        let item = {
            let stream = self.in_flight.as_mut()?;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = stream.next() => Some(item),
            }
        };
        let Some(item) = item else {
            self.teardown();
            return None;
        };

        match item {
            Some(Ok(snapshot)) => {
                if let Some(turn) = self.turns.last_mut() {
                    turn.replace_text(&snapshot);
                }
                Some(ReplyEvent::Snapshot(snapshot))
            }
            Some(Err(e)) => {
                warn!(error = %e, "generation failed");
                self.in_flight = None;
                let fallback = self.settings.fallback_message.clone();
                if let Some(turn) = self.turns.last_mut() {
                    turn.finish(Some(fallback));
                }
                Some(ReplyEvent::Failed(e))
            }
            None => {
                self.in_flight = None;
                let turn = self.turns.last_mut()?;
                turn.finish(None);
                debug!(turn = %turn.id, chars = turn.text().len(), "reply finished");
                Some(ReplyEvent::Finished(turn.text().to_string()))
            }
        }
    }

    /// [`submit`](Self::submit) and stream the reply's events until it ends.
    ///
    /// The stream is boxed, so callers can poll it with `next()` directly.
    pub fn submit_turn(
        &mut self,
        text: impl Into<String>,
    ) -> Result<BoxStream<'_, ReplyEvent>, SessionError> {
        self.submit(text)?;
        Ok(stream::unfold(self, |session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
        .boxed())
    }

    /// Tear the session down. Idempotent.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.teardown();
    }

    fn ensure_open(&mut self) -> Result<(), SessionError> {
        if self.closed || self.cancel.is_cancelled() {
            self.teardown();
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if !self.closed {
            debug!(
                document = %self.document.document_key(),
                dropped_reply = self.in_flight.is_some(),
                "session closed"
            );
        }
        self.closed = true;
        self.in_flight = None;
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
