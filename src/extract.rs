//! Document parsing entry point.
//!
//! Decides whether an upload is a PDF or an EPUB and hands the bytes to the
//! matching parser. Both parsers produce a [`Document`] whose pages are
//! plain UTF-8 text with collapsed whitespace.

use std::io::Read;

use pagewise_core::models::{Document, DocumentKind};
use tokio_util::sync::CancellationToken;

use crate::config::EpubConfig;
use crate::error::ReaderError;
use crate::{epub, pdf};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_EPUB: &str = "application/epub+zip";

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Work out the format from the declared MIME type, the file extension, and
/// finally the leading bytes.
pub fn detect_kind(
    bytes: &[u8],
    declared_mime: Option<&str>,
    file_name: &str,
) -> Result<DocumentKind, ReaderError> {
    let mime = declared_mime
        .and_then(|m| m.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some(MIME_PDF) => return Ok(DocumentKind::Pdf),
        Some(MIME_EPUB) => return Ok(DocumentKind::Epub),
        _ => {}
    }

    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        return Ok(DocumentKind::Pdf);
    }
    if lower.ends_with(".epub") {
        return Ok(DocumentKind::Epub);
    }

    if bytes.starts_with(PDF_SIGNATURE) {
        return Ok(DocumentKind::Pdf);
    }
    if bytes.starts_with(ZIP_SIGNATURE) {
        return Ok(DocumentKind::Epub);
    }

    Err(ReaderError::UnsupportedFormat(
        mime.unwrap_or_else(|| file_name.to_string()),
    ))
}

/// Detect the format and parse. The caller's token aborts the parse at the
/// next page or member boundary with [`ReaderError::Cancelled`].
pub fn parse_document(
    bytes: Vec<u8>,
    declared_mime: Option<&str>,
    file_name: &str,
    epub_config: &EpubConfig,
    cancel: &CancellationToken,
) -> Result<Document, ReaderError> {
    match detect_kind(&bytes, declared_mime, file_name)? {
        DocumentKind::Pdf => pdf::parse_pdf(bytes, file_name, cancel),
        DocumentKind::Epub => epub::parse_epub(&bytes, file_name, epub_config, cancel),
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), ReaderError> {
    if cancel.is_cancelled() {
        return Err(ReaderError::Cancelled);
    }
    Ok(())
}

/// Collapse every whitespace run to one space and trim both ends.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// File name without directories or extension.
pub(crate) fn file_stem(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

pub(crate) fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ReaderError> {
    let entry = archive.by_name(name).map_err(ReaderError::epub)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ReaderError::epub)?;
    if out.len() as u64 >= max_bytes {
        return Err(ReaderError::epub(format!(
            "zip entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_mime_wins() {
        let kind = detect_kind(b"", Some("application/pdf; charset=binary"), "x.bin").unwrap();
        assert_eq!(kind, DocumentKind::Pdf);
        let kind = detect_kind(b"", Some(MIME_EPUB), "x.pdf").unwrap();
        assert_eq!(kind, DocumentKind::Epub);
    }

    #[test]
    fn extension_then_signature() {
        assert_eq!(
            detect_kind(b"", None, "Book.EPUB").unwrap(),
            DocumentKind::Epub
        );
        assert_eq!(
            detect_kind(b"%PDF-1.7\n", Some("application/octet-stream"), "upload").unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            detect_kind(b"PK\x03\x04rest", None, "upload").unwrap(),
            DocumentKind::Epub
        );
    }

    #[test]
    fn unknown_input_is_unsupported() {
        let err = detect_kind(b"hello", Some("text/plain"), "notes.txt").unwrap_err();
        assert!(matches!(err, ReaderError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_is_parse_failure() {
        let err = parse_document(
            b"not a pdf".to_vec(),
            Some(MIME_PDF),
            "bad.pdf",
            &EpubConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::ParseFailure { kind: "PDF", .. }));
    }

    #[test]
    fn invalid_zip_is_parse_failure() {
        let err = parse_document(
            b"not a zip".to_vec(),
            None,
            "bad.epub",
            &EpubConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::ParseFailure { kind: "EPUB", .. }));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(collapse_whitespace(" \n "), "");
    }

    #[test]
    fn stem_strips_directories_and_extension() {
        assert_eq!(file_stem("books/Moby Dick.epub"), "Moby Dick");
    }
}
