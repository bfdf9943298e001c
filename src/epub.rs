//! EPUB parser.
//!
//! The container is read as a zip archive. Every HTML/XHTML member becomes a
//! candidate page; members with neither text nor images are dropped and do
//! not consume a page index. Images referenced by a page are inlined as
//! `data:` URIs so the render payload is self-contained.
//!
//! # Reading order
//!
//! With [`ReadingOrder::Spine`] the OPF package named by
//! `META-INF/container.xml` orders the members listed in its spine, and any
//! other HTML members follow in path order. Without a usable package, or
//! with [`ReadingOrder::Lexicographic`], members are sorted by path.
//!
//! The outline is flat: one level-0 entry per page, titled from the member's
//! `<title>`, its file stem, or `Chapter <n>`.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use base64::Engine;
use pagewise_core::models::{Document, DocumentKind, OutlineEntry, PageContent, RenderUnit};
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::{EpubConfig, ReadingOrder};
use crate::error::ReaderError;
use crate::extract::{check_cancelled, collapse_whitespace, file_stem, read_zip_entry_bounded};
use crate::markup::process_markup;

const CONTAINER_PATH: &str = "META-INF/container.xml";

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub fn parse_epub(
    bytes: &[u8],
    file_name: &str,
    config: &EpubConfig,
    cancel: &CancellationToken,
) -> Result<Document, ReaderError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(ReaderError::epub)?;
    let members: HashSet<String> = archive.file_names().map(str::to_string).collect();

    let mut html: Vec<String> = members.iter().filter(|n| is_html(n)).cloned().collect();
    html.sort();

    let package = match config.reading_order {
        ReadingOrder::Spine => read_package(&mut archive, config.max_entry_bytes),
        ReadingOrder::Lexicographic => None,
    };
    let ordered = match &package {
        Some(package) => spine_order(html, &package.spine),
        None => html,
    };

    let mut pages = Vec::new();
    let mut outline = Vec::new();
    for member in &ordered {
        check_cancelled(cancel)?;
        let xml = read_zip_entry_bounded(&mut archive, member, config.max_entry_bytes)?;

        let mut inline = |reference: &str| {
            inline_image(
                &mut archive,
                &members,
                member,
                reference,
                config.max_entry_bytes,
            )
        };
        let processed = process_markup(&xml, &mut inline)
            .map_err(|e| ReaderError::epub(format!("{}: {}", member, e)))?;

        let text = collapse_whitespace(&processed.text);
        if text.is_empty() && processed.image_count == 0 {
            debug!(member = %member, "content document is empty, skipped");
            continue;
        }

        let ordinal = pages.len() + 1;
        let title = processed
            .title
            .or_else(|| member_stem(member))
            .unwrap_or_else(|| format!("Chapter {}", ordinal));
        outline.push(OutlineEntry {
            title,
            page_index: pages.len(),
            level: 0,
        });
        pages.push(PageContent {
            text,
            render: RenderUnit::Markup(processed.body),
        });
    }

    let title = package
        .and_then(|p| p.title)
        .unwrap_or_else(|| file_stem(file_name));

    info!(
        file = file_name,
        members = ordered.len(),
        pages = pages.len(),
        "parsed EPUB"
    );
    Ok(Document::new(
        title,
        file_name,
        DocumentKind::Epub,
        pages,
        outline,
    ))
}

fn is_html(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
}

fn member_stem(member: &str) -> Option<String> {
    let stem = file_stem(member);
    (!stem.trim().is_empty()).then_some(stem)
}

/// Spine members first, then every other HTML member in path order.
fn spine_order(html_sorted: Vec<String>, spine: &[String]) -> Vec<String> {
    let available: HashSet<&String> = html_sorted.iter().collect();
    let mut seen = HashSet::new();
    let mut ordered: Vec<String> = spine
        .iter()
        .filter(|m| available.contains(m) && seen.insert((*m).clone()))
        .cloned()
        .collect();
    ordered.extend(html_sorted.iter().filter(|m| !seen.contains(*m)).cloned());
    ordered
}

/// MIME type for an inlined image, from its extension.
pub(crate) fn image_mime(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn inline_image(
    archive: &mut Archive<'_>,
    members: &HashSet<String>,
    member: &str,
    reference: &str,
    max_bytes: u64,
) -> Option<String> {
    if reference.starts_with("data:") || reference.contains("://") {
        return None;
    }
    let path = resolve_relative(member, reference)?;
    if !members.contains(&path) {
        debug!(member, reference, "image reference does not resolve to a member");
        return None;
    }
    match read_zip_entry_bounded(archive, &path, max_bytes) {
        Ok(data) => Some(format!(
            "data:{};base64,{}",
            image_mime(&path),
            base64::engine::general_purpose::STANDARD.encode(data)
        )),
        Err(e) => {
            warn!(member, image = %path, error = %e, "could not read image");
            None
        }
    }
}

/// Resolve `reference` against the directory of `base`, the way a browser
/// resolves a relative URL. Returns `None` if it climbs above the root.
pub(crate) fn resolve_relative(base: &str, reference: &str) -> Option<String> {
    let reference = reference.split(['#', '?']).next().unwrap_or_default();
    let reference = percent_decode(reference);
    if reference.is_empty() {
        return None;
    }

    let mut segments: Vec<&str> = if reference.starts_with('/') {
        Vec::new()
    } else {
        match base.rsplit_once('/') {
            Some((dir, _)) => dir.split('/').filter(|s| !s.is_empty()).collect(),
            None => Vec::new(),
        }
    };

    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or_default();
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Title and spine of the OPF package document.
#[derive(Debug, Default)]
struct Package {
    title: Option<String>,
    spine: Vec<String>,
}

fn read_package(archive: &mut Archive<'_>, max_bytes: u64) -> Option<Package> {
    let container = read_zip_entry_bounded(archive, CONTAINER_PATH, max_bytes).ok()?;
    let opf_path = rootfile_path(&container)?;
    let opf = match read_zip_entry_bounded(archive, &opf_path, max_bytes) {
        Ok(opf) => opf,
        Err(e) => {
            warn!(package = %opf_path, error = %e, "package document unreadable, using path order");
            return None;
        }
    };
    match parse_package(&opf, &opf_path) {
        Ok(package) => Some(package),
        Err(e) => {
            warn!(package = %opf_path, error = %e, "package document malformed, using path order");
            None
        }
    }
}

fn rootfile_path(container: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(container);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                return e
                    .try_get_attribute("full-path")
                    .ok()
                    .flatten()
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn parse_package(opf: &[u8], opf_path: &str) -> Result<Package, quick_xml::Error> {
    let mut reader = Reader::from_reader(opf);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut idrefs: Vec<String> = Vec::new();
    let mut title: Option<String> = None;
    let mut in_title = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    let id = attr_value(&e, "id");
                    let href = attr_value(&e, "href");
                    if let (Some(id), Some(href)) = (id, href) {
                        if let Some(path) = resolve_relative(opf_path, &href) {
                            manifest.insert(id, path);
                        }
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr_value(&e, "idref") {
                        idrefs.push(idref);
                    }
                }
                b"title" if title.is_none() => in_title = true,
                _ => {}
            },
            Event::Text(t) if in_title => {
                let text = collapse_whitespace(&t.unescape()?);
                if !text.is_empty() {
                    title = Some(text);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"title" => in_title = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let spine = idrefs
        .iter()
        .filter_map(|id| manifest.get(id).cloned())
        .collect();
    Ok(Package { title, spine })
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
