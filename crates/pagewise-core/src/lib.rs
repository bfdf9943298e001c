//! # Pagewise Core
//!
//! Runtime-free logic shared by the `pagewise` reader: the document and
//! conversation data model, the context window builder, outbound request
//! composition, and the reading-progress store abstraction.
//!
//! This crate has no tokio, sqlx, HTTP or file-format dependencies. Parsing,
//! persistence backends and the generator transport live in the `pagewise`
//! crate.

pub mod context;
pub mod models;
pub mod prompt;
pub mod store;
