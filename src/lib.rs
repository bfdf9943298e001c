//! # Pagewise
//!
//! A reader core for PDF and EPUB files with a spoiler-free assistant.
//!
//! Documents are parsed into ordered pages of plain text. Questions asked on
//! page *N* are answered from pages `1..=N` only: the later text is never put
//! into the outbound request.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌───────────────┐
//! │  bytes +   │──▶│ DocumentLoader │──▶│   Document    │
//! │ file name  │   │   PDF / EPUB   │   │ pages+outline │
//! └────────────┘   └────────────────┘   └───────┬───────┘
//!                                               │ pages[..=current]
//!                  ┌────────────────┐   ┌───────▼───────┐
//!                  │   Generator    │◀──│ Conversation  │
//!                  │  (streaming)   │──▶│    Session    │
//!                  └────────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Format detection and parser dispatch |
//! | [`loader`] | Cancelable, last-submission-wins parsing |
//! | [`sqlite_store`] | Durable reading progress |
//! | [`generator`] | Streaming text generation providers |
//! | [`session`] | Conversation state machine |
//! | [`reader`] | Facade used by the viewer and the CLI |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
mod epub;
pub mod error;
pub mod extract;
pub mod generator;
pub mod loader;
mod markup;
pub mod migrate;
mod pdf;
pub mod reader;
pub mod session;
pub mod sqlite_store;

pub use pagewise_core::{context, models, prompt, store};
