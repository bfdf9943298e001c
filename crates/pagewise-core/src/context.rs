//! Context window builder.
//!
//! Derives the part of a document the assistant is allowed to see: the
//! text of every page up to and including the reader's current page. Later
//! pages are never read here, so they can never reach a generation request.
//!
//! # Format
//!
//! Each page becomes a labeled block, blocks are separated by a blank line:
//!
//! ```text
//! [Page 1]
//! first page text
//!
//! [Page 2]
//! second page text
//! ```
//!
//! # Example
//!
//! ```rust
//! use pagewise_core::context::build_context;
//!
//! let ctx = build_context(&["A", "B", "C"], 1);
//! assert_eq!(ctx, "[Page 1]\nA\n\n[Page 2]\nB");
//! ```

/// Separator placed between page blocks.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Label line for a 0-based page index.
pub fn page_label(page_index: usize) -> String {
    format!("[Page {}]", page_index + 1)
}

/// Build the context window for `current_page_index`.
///
/// Pure: identical inputs give identical output. An index past the end is
/// treated as the last page; an empty page list yields an empty string.
pub fn build_context<S: AsRef<str>>(pages: &[S], current_page_index: usize) -> String {
    if pages.is_empty() {
        return String::new();
    }
    let last = current_page_index.min(pages.len() - 1);

    pages[..=last]
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}\n{}", page_label(i), text.as_ref()))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_pages_up_to_current() {
        let ctx = build_context(&["A", "B", "C"], 1);
        assert!(ctx.contains('A'));
        assert!(ctx.contains('B'));
        assert!(!ctx.contains('C'));
    }

    #[test]
    fn first_page_only() {
        assert_eq!(build_context(&["alpha", "beta"], 0), "[Page 1]\nalpha");
    }

    #[test]
    fn never_leaks_later_pages() {
        let pages: Vec<String> = (0..20).map(|i| format!("secret-{:02}", i)).collect();
        for current in 0..pages.len() {
            let ctx = build_context(&pages, current);
            for (i, text) in pages.iter().enumerate() {
                assert_eq!(ctx.contains(text.as_str()), i <= current, "page {}", i);
            }
        }
    }

    #[test]
    fn blocks_are_in_ascending_order() {
        let ctx = build_context(&["one", "two", "three"], 2);
        let one = ctx.find("one").unwrap();
        let two = ctx.find("two").unwrap();
        let three = ctx.find("three").unwrap();
        assert!(one < two && two < three);
        assert_eq!(ctx.matches(BLOCK_SEPARATOR).count(), 2);
    }

    #[test]
    fn deterministic() {
        let pages = ["x", "y", "z"];
        assert_eq!(build_context(&pages, 2), build_context(&pages, 2));
    }

    #[test]
    fn index_past_end_is_clamped() {
        assert_eq!(build_context(&["a", "b"], 99), build_context(&["a", "b"], 1));
    }

    #[test]
    fn empty_pages_yield_empty_context() {
        let pages: [&str; 0] = [];
        assert_eq!(build_context(&pages, 0), "");
    }
}
