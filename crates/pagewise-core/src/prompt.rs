//! Outbound request composition.
//!
//! One [`GenerationRequest`] is built per user turn from three parts:
//!
//! 1. a system instruction stating the no-spoiler rule and embedding the
//!    context window for the reader's current page;
//! 2. the most recent prior turns (system turns excluded), role-labeled,
//!    oldest first;
//! 3. the new user text as the final line.

use serde::Serialize;

use crate::context::build_context;
use crate::models::{ChatTurn, Role};

/// Number of prior turns (three user/assistant pairs) sent with a request.
pub const DEFAULT_HISTORY_TURNS: usize = 6;

/// The single call made to the generator for a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub prompt: String,
}

/// Instruction block sent as the system message.
pub fn system_instruction(context: &str, current_page_index: usize, page_count: usize) -> String {
    let page = current_page_index + 1;
    format!(
        "You are a reading companion. The reader is on page {page} of {page_count} and has \
         only read pages 1 to {page}. Answer using only the document text below. Do not \
         reveal, predict or speculate about anything that happens after page {page}. If the \
         text below does not contain the answer, say that the reader has not reached it yet \
         or that it is not covered.\n\n\
         --- DOCUMENT TEXT (pages 1-{page}) ---\n\
         {context}\n\
         --- END OF DOCUMENT TEXT ---"
    )
}

/// The trailing window of finished, non-system turns, oldest first.
pub fn history_window(turns: &[ChatTurn], max_turns: usize) -> Vec<&ChatTurn> {
    let eligible: Vec<&ChatTurn> = turns
        .iter()
        .filter(|t| t.role != Role::System && !t.is_streaming())
        .collect();
    let skip = eligible.len().saturating_sub(max_turns);
    eligible.into_iter().skip(skip).collect()
}

/// Role-labeled history followed by the new user line.
pub fn compose_prompt(history: &[&ChatTurn], user_text: &str) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text()))
        .collect();
    lines.push(format!("{}: {}", Role::User.label(), user_text));
    lines.join("\n")
}

/// Build the full request for `user_text`.
///
/// `prior_turns` must not contain the turn being submitted. The context
/// window is derived from `current_page_index` at call time.
pub fn build_request<S: AsRef<str>>(
    pages: &[S],
    current_page_index: usize,
    prior_turns: &[ChatTurn],
    user_text: &str,
    max_history_turns: usize,
) -> GenerationRequest {
    let current = current_page_index.min(pages.len().saturating_sub(1));
    let context = build_context(pages, current);
    let history = history_window(prior_turns, max_history_turns);

    GenerationRequest {
        system_instruction: system_instruction(&context, current, pages.len()),
        prompt: compose_prompt(&history, user_text),
    }
}
