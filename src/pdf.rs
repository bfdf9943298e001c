//! PDF parser built on `lopdf`.
//!
//! Each page's text runs (one per show-text operator) are decoded in
//! content-stream order, joined with single spaces and collapsed. When `lopdf` cannot decode a page, `pdf-extract`'s
//! per-page extraction is used for that page instead. The input bytes are
//! kept, unmodified, as the render payload of every page.
//!
//! The outline tree is walked depth-first. Entries whose destination cannot
//! be resolved to a page of this file (external links, broken named
//! destinations, remote page numbers) are left out, but their children are
//! still visited one level deeper.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lopdf::{Dictionary, Document as PdfDocument, Encoding, Object, ObjectId};
use pagewise_core::models::{Document, DocumentKind, OutlineEntry, PageContent, RenderUnit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ReaderError;
use crate::extract::{check_cancelled, collapse_whitespace, file_stem};

/// Outline nesting deeper than this is not followed.
const MAX_OUTLINE_DEPTH: usize = 64;
/// Indirection limit for destination and name-tree lookups.
const MAX_LOOKUP_DEPTH: usize = 32;

pub fn parse_pdf(
    bytes: Vec<u8>,
    file_name: &str,
    cancel: &CancellationToken,
) -> Result<Document, ReaderError> {
    let source: Arc<[u8]> = Arc::from(bytes);
    let pdf = PdfDocument::load_mem(&source[..]).map_err(ReaderError::pdf)?;
    let pages = pdf.get_pages();

    let mut fallback: Option<Vec<String>> = None;
    let mut contents = Vec::with_capacity(pages.len());
    for (position, (&page_number, &page_id)) in pages.iter().enumerate() {
        check_cancelled(cancel)?;
        let raw = match page_runs(&pdf, page_id) {
            Ok(runs) => runs.join(" "),
            Err(e) => {
                debug!(page_number, error = %e, "lopdf text extraction failed, using pdf-extract");
                fallback_page_text(&source, &mut fallback, position)
            }
        };
        contents.push(PageContent {
            text: collapse_whitespace(&raw),
            render: RenderUnit::PdfPage {
                source: Arc::clone(&source),
                page_number,
            },
        });
    }

    let page_index: HashMap<ObjectId, usize> = pages
        .values()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let outline = read_outline(&pdf, &page_index);
    let title = info_title(&pdf).unwrap_or_else(|| file_stem(file_name));

    info!(
        file = file_name,
        pages = contents.len(),
        outline_entries = outline.len(),
        "parsed PDF"
    );
    Ok(Document::new(
        title,
        file_name,
        DocumentKind::Pdf,
        contents,
        outline,
    ))
}

/// Decoded text runs of one page in content-stream order.
///
/// `Tj`, `'` and `"` each yield one run; a `TJ` array yields one run whose
/// strings are concatenated, with a space wherever the kerning adjustment is
/// wide enough to be a word gap.
fn page_runs(pdf: &PdfDocument, page_id: ObjectId) -> lopdf::Result<Vec<String>> {
    let encodings: HashMap<Vec<u8>, Encoding> = pdf
        .get_page_fonts(page_id)?
        .into_iter()
        .filter_map(|(name, font)| font.get_font_encoding(pdf).ok().map(|e| (name, e)))
        .collect();
    let content = pdf.get_and_decode_page_content(page_id)?;

    let mut runs = Vec::new();
    let mut encoding: Option<&Encoding> = None;
    for op in &content.operations {
        match op.operator.as_str() {
            "Tf" => {
                encoding = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| encodings.get(name));
            }
            "Tj" | "'" | "\"" | "TJ" => {
                let Some(encoding) = encoding else {
                    return Err(lopdf::Error::Syntax(
                        "text shown without a decodable font".to_string(),
                    ));
                };
                let Some(operand) = op.operands.last() else {
                    continue;
                };
                let run = decode_run(encoding, operand)?;
                if !run.trim().is_empty() {
                    runs.push(run);
                }
            }
            _ => {}
        }
    }
    Ok(runs)
}

fn decode_run(encoding: &Encoding, operand: &Object) -> lopdf::Result<String> {
    match operand {
        Object::String(bytes, _) => PdfDocument::decode_text(encoding, bytes),
        Object::Array(items) => {
            let mut run = String::new();
            for item in items {
                match item {
                    Object::String(bytes, _) => {
                        run.push_str(&PdfDocument::decode_text(encoding, bytes)?)
                    }
                    Object::Integer(adjust) if *adjust < -100 => run.push(' '),
                    Object::Real(adjust) if *adjust < -100.0 => run.push(' '),
                    _ => {}
                }
            }
            Ok(run)
        }
        _ => Ok(String::new()),
    }
}

/// Text of one page via `pdf-extract`, extracting the whole file at most once.
fn fallback_page_text(source: &[u8], cache: &mut Option<Vec<String>>, position: usize) -> String {
    let pages = cache.get_or_insert_with(|| {
        pdf_extract::extract_text_from_mem_by_pages(source).unwrap_or_else(|e| {
            warn!(error = %e, "pdf-extract could not read the document");
            Vec::new()
        })
    });
    pages.get(position).cloned().unwrap_or_default()
}

fn deref<'a>(pdf: &'a PdfDocument, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => pdf.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn deref_dict<'a>(pdf: &'a PdfDocument, obj: &'a Object) -> Option<&'a Dictionary> {
    deref(pdf, obj).as_dict().ok()
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, otherwise
/// PDFDocEncoding (treated as Latin-1).
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn text_value(pdf: &PdfDocument, obj: &Object) -> Option<String> {
    match deref(pdf, obj) {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

fn info_title(pdf: &PdfDocument) -> Option<String> {
    let info = deref_dict(pdf, pdf.trailer.get(b"Info").ok()?)?;
    let title = collapse_whitespace(&text_value(pdf, info.get(b"Title").ok()?)?);
    (!title.is_empty()).then_some(title)
}

fn read_outline(pdf: &PdfDocument, page_index: &HashMap<ObjectId, usize>) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();
    let Ok(catalog) = pdf.catalog() else {
        return entries;
    };
    let Some(root) = catalog
        .get(b"Outlines")
        .ok()
        .and_then(|o| deref_dict(pdf, o))
    else {
        return entries;
    };
    if let Ok(first) = root.get(b"First") {
        let mut visited = HashSet::new();
        walk_outline(pdf, first, 0, page_index, &mut visited, &mut entries);
    }
    entries
}

fn walk_outline(
    pdf: &PdfDocument,
    first: &Object,
    level: usize,
    page_index: &HashMap<ObjectId, usize>,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<OutlineEntry>,
) {
    if level > MAX_OUTLINE_DEPTH {
        warn!(level, "outline nesting too deep, ignoring the rest");
        return;
    }

    let mut cursor = first.as_reference().ok();
    while let Some(id) = cursor {
        if !visited.insert(id) {
            debug!(?id, "outline cycle detected");
            break;
        }
        let Ok(node) = pdf.get_dictionary(id) else {
            break;
        };

        let title = node
            .get(b"Title")
            .ok()
            .and_then(|t| text_value(pdf, t))
            .map(|t| collapse_whitespace(&t))
            .unwrap_or_default();

        match resolve_target(pdf, node, page_index) {
            Some(page) => out.push(OutlineEntry {
                title,
                page_index: page,
                level,
            }),
            None => debug!(title = %title, level, "outline entry does not resolve to a page, dropped"),
        }

        if let Ok(child) = node.get(b"First") {
            walk_outline(pdf, child, level + 1, page_index, visited, out);
        }

        cursor = node.get(b"Next").ok().and_then(|n| n.as_reference().ok());
    }
}

fn resolve_target(
    pdf: &PdfDocument,
    node: &Dictionary,
    page_index: &HashMap<ObjectId, usize>,
) -> Option<usize> {
    if let Ok(dest) = node.get(b"Dest") {
        return resolve_dest(pdf, dest, page_index, 0);
    }

    let action = deref_dict(pdf, node.get(b"A").ok()?)?;
    let kind = action.get(b"S").ok()?.as_name().ok()?;
    if kind != b"GoTo" {
        // URI, GoToR, Launch and friends point outside this file.
        return None;
    }
    resolve_dest(pdf, action.get(b"D").ok()?, page_index, 0)
}

fn resolve_dest(
    pdf: &PdfDocument,
    dest: &Object,
    page_index: &HashMap<ObjectId, usize>,
    depth: usize,
) -> Option<usize> {
    if depth > MAX_LOOKUP_DEPTH {
        return None;
    }
    match deref(pdf, dest) {
        Object::Array(items) => match items.first()? {
            Object::Reference(id) => page_index.get(id).copied(),
            _ => None,
        },
        Object::Dictionary(dict) => resolve_dest(pdf, dict.get(b"D").ok()?, page_index, depth + 1),
        Object::Name(name) | Object::String(name, _) => {
            let target = lookup_named_dest(pdf, name)?;
            resolve_dest(pdf, target, page_index, depth + 1)
        }
        _ => None,
    }
}

/// Find a named destination in the catalog `/Dests` dictionary or the
/// `/Names /Dests` name tree.
fn lookup_named_dest<'a>(pdf: &'a PdfDocument, name: &[u8]) -> Option<&'a Object> {
    let catalog = pdf.catalog().ok()?;

    if let Some(dests) = catalog.get(b"Dests").ok().and_then(|d| deref_dict(pdf, d)) {
        if let Ok(target) = dests.get(name) {
            return Some(target);
        }
    }

    let names = deref_dict(pdf, catalog.get(b"Names").ok()?)?;
    let tree = deref_dict(pdf, names.get(b"Dests").ok()?)?;
    search_name_tree(pdf, tree, name, 0)
}

fn search_name_tree<'a>(
    pdf: &'a PdfDocument,
    node: &'a Dictionary,
    name: &[u8],
    depth: usize,
) -> Option<&'a Object> {
    if depth > MAX_LOOKUP_DEPTH {
        return None;
    }

    if let Ok(pairs) = node.get(b"Names").map(|n| deref(pdf, n)) {
        if let Ok(pairs) = pairs.as_array() {
            for pair in pairs.chunks_exact(2) {
                if let Object::String(key, _) = deref(pdf, &pair[0]) {
                    if key.as_slice() == name {
                        return Some(&pair[1]);
                    }
                }
            }
        }
    }

    if let Ok(kids) = node.get(b"Kids").map(|k| deref(pdf, k)) {
        if let Ok(kids) = kids.as_array() {
            for kid in kids {
                if let Some(kid) = deref_dict(pdf, kid) {
                    if let Some(found) = search_name_tree(pdf, kid, name, depth + 1) {
                        return Some(found);
                    }
                }
            }
        }
    }

    None
}
