//! Lenient XHTML processing for EPUB content documents.
//!
//! A single `quick-xml` pass over a member collects the `<title>`, the
//! body's plain text and the body markup, rewriting image references on the
//! way. HTML leftovers that trip a strict XML reader (mismatched end tags,
//! valueless attributes, named entities such as `&nbsp;`) are tolerated.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Result of processing one content document.
#[derive(Debug, Default)]
pub(crate) struct ProcessedMarkup {
    pub title: Option<String>,
    /// Body text in document order. Whitespace is not yet collapsed.
    pub text: String,
    /// Serialized inner markup of `<body>`, images rewritten.
    pub body: String,
    pub image_count: usize,
}

/// Elements whose boundaries separate words.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "nav", "ol",
    "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Elements left out of both the page text and the body markup, along with
/// everything inside them.
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "title"];

/// Process `xml`. `inline_image` receives each image reference as written in
/// the markup and returns a replacement (a `data:` URI) when it can resolve it.
pub(crate) fn process_markup(
    xml: &[u8],
    inline_image: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<ProcessedMarkup, quick_xml::Error> {
    let processed = run(xml, false, inline_image)?;
    if processed.1 {
        return Ok(processed.0);
    }
    // No <body>: treat the whole document as the body.
    Ok(run(xml, true, inline_image)?.0)
}

fn run(
    xml: &[u8],
    whole_document: bool,
    inline_image: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<(ProcessedMarkup, bool), quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().check_end_names = false;

    let mut writer = Writer::new(Vec::new());
    let mut out = ProcessedMarkup::default();
    let mut buf = Vec::new();

    let mut in_body = whole_document;
    let mut body_seen = false;
    let mut in_title = false;
    let mut title = String::new();
    let mut hidden_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let mut emit: Option<Event> = None;

        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let name = element_name(&e);
                if name == "body" && !whole_document {
                    in_body = true;
                    body_seen = true;
                } else {
                    if name == "title" {
                        in_title = true;
                    }
                    if in_body {
                        if HIDDEN_ELEMENTS.contains(&name.as_str()) {
                            hidden_depth += 1;
                        } else if hidden_depth == 0 && !is_root(&name, whole_document) {
                            if BLOCK_ELEMENTS.contains(&name.as_str()) {
                                out.text.push(' ');
                            }
                            emit = Some(Event::Start(visit_element(
                                e,
                                &name,
                                &mut out.image_count,
                                inline_image,
                            )));
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if in_body && hidden_depth == 0 {
                    let name = element_name(&e);
                    if BLOCK_ELEMENTS.contains(&name.as_str()) {
                        out.text.push(' ');
                    }
                    emit = Some(Event::Empty(visit_element(
                        e,
                        &name,
                        &mut out.image_count,
                        inline_image,
                    )));
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if name == "body" && !whole_document {
                    in_body = false;
                } else {
                    if name == "title" {
                        in_title = false;
                    }
                    if in_body {
                        if HIDDEN_ELEMENTS.contains(&name.as_str()) {
                            hidden_depth = hidden_depth.saturating_sub(1);
                        } else if hidden_depth == 0 && !is_root(&name, whole_document) {
                            if BLOCK_ELEMENTS.contains(&name.as_str()) {
                                out.text.push(' ');
                            }
                            emit = Some(Event::End(e));
                        }
                    }
                }
            }
            Event::Text(t) => {
                let text = unescape_html(&t);
                if in_title {
                    title.push_str(&text);
                }
                if in_body && hidden_depth == 0 {
                    out.text.push_str(&text);
                    emit = Some(Event::Text(t));
                }
            }
            Event::CData(c) => {
                if in_body && hidden_depth == 0 {
                    out.text.push_str(&String::from_utf8_lossy(&c));
                    emit = Some(Event::CData(c));
                }
            }
            // Comments, processing instructions, declarations and doctypes
            // are not part of the rendered body.
            _ => {}
        }

        if let Some(event) = emit {
            writer.write_event(event)?;
        }
        buf.clear();
    }

    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    out.title = (!title.is_empty()).then_some(title);
    out.body = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    Ok((out, body_seen))
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

/// The `<html>` wrapper of a document processed without a `<body>`.
fn is_root(name: &str, whole_document: bool) -> bool {
    whole_document && name == "html"
}

fn is_image(name: &str) -> bool {
    name == "img" || name == "image"
}

/// Count images and rewrite their references. Other elements pass through.
fn visit_element<'a>(
    e: BytesStart<'a>,
    name: &str,
    image_count: &mut usize,
    inline_image: &mut dyn FnMut(&str) -> Option<String>,
) -> BytesStart<'a> {
    if !is_image(name) {
        return e;
    }
    *image_count += 1;

    let mut rewritten = e.to_owned();
    rewritten.clear_attributes();
    for attr in e.html_attributes().flatten() {
        let key = attr.key.local_name();
        if matches!(key.as_ref(), b"src" | b"href") {
            let reference = attr
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            if let Some(data_uri) = inline_image(&reference) {
                rewritten.push_attribute((attr.key.as_ref(), data_uri.as_bytes()));
                continue;
            }
        }
        rewritten.push_attribute(attr);
    }
    rewritten
}

fn unescape_html(text: &BytesText<'_>) -> String {
    text.unescape_with(html_entity)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| String::from_utf8_lossy(text).into_owned())
}

/// Named HTML entities commonly found in EPUB content that XML does not predefine.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "shy" => "\u{ad}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "times" => "\u{d7}",
        "eacute" => "\u{e9}",
        "egrave" => "\u{e8}",
        "agrave" => "\u{e0}",
        "ccedil" => "\u{e7}",
        "uuml" => "\u{fc}",
        "ouml" => "\u{f6}",
        "auml" => "\u{e4}",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(xml: &str) -> ProcessedMarkup {
        process_markup(xml.as_bytes(), &mut |_| None).unwrap()
    }

    #[test]
    fn collects_title_text_and_body() {
        let p = process(
            "<html><head><title> Chapter  One </title><style>p{}</style></head>\
             <body><h1>One</h1><p>Call me&nbsp;Ishmael.</p></body></html>",
        );
        assert_eq!(p.title.as_deref(), Some("Chapter One"));
        assert_eq!(
            p.text.split_whitespace().collect::<Vec<_>>(),
            vec!["One", "Call", "me", "Ishmael."]
        );
        assert!(p.body.starts_with("<h1>One</h1>"));
        assert!(!p.body.contains("<body"));
        assert_eq!(p.image_count, 0);
    }

    #[test]
    fn block_boundaries_separate_words() {
        let p = process("<html><body><p>end</p><p>start</p></body></html>");
        assert!(p.text.contains("end start") || p.text.contains("end  start"));
    }

    #[test]
    fn script_text_is_ignored() {
        let p = process("<html><body><script>var x = 1;</script><p>hi</p></body></html>");
        assert_eq!(p.text.trim(), "hi");
    }

    #[test]
    fn images_are_rewritten_when_resolved() {
        let xml = "<html><body><img src=\"a.png\" alt=\"A\"/><img src=\"missing.png\"/></body></html>";
        let p = process_markup(xml.as_bytes(), &mut |src| {
            (src == "a.png").then(|| "data:image/png;base64,AAAA".to_string())
        })
        .unwrap();
        assert_eq!(p.image_count, 2);
        assert!(p.body.contains("src=\"data:image/png;base64,AAAA\""));
        assert!(p.body.contains("alt=\"A\""));
        assert!(p.body.contains("src=\"missing.png\""));
    }

    #[test]
    fn svg_image_href_is_rewritten() {
        let xml = "<html><body><svg><image xlink:href=\"../img/c.jpg\"/></svg></body></html>";
        let p = process_markup(xml.as_bytes(), &mut |_| Some("data:image/jpeg;base64,".into()))
            .unwrap();
        assert_eq!(p.image_count, 1);
        assert!(p.body.contains("xlink:href=\"data:image/jpeg;base64,\""));
    }

    #[test]
    fn fragment_without_body_is_used_whole() {
        let p = process("<div><p>loose text</p></div>");
        assert_eq!(p.text.trim(), "loose text");
        assert!(p.body.contains("loose text"));
    }

    #[test]
    fn head_markup_stays_out_of_bodyless_documents() {
        let p = process(
            "<html><head><title>T</title><style>p{color:red}</style><link href=\"a.css\"/></head>\
             <p>x</p><script>var y;</script></html>",
        );
        assert_eq!(p.title.as_deref(), Some("T"));
        assert_eq!(p.text.trim(), "x");
        assert_eq!(p.body, "<p>x</p>");
    }

    #[test]
    fn script_markup_is_not_serialized() {
        let p = process("<html><body><p>a</p><script>var x = 1;</script></body></html>");
        assert_eq!(p.body, "<p>a</p>");
    }

    #[test]
    fn unclosed_html_tags_are_tolerated() {
        let p = process("<html><body><p>one<br>two</p></body></html>");
        assert!(p.text.contains("one"));
        assert!(p.text.contains("two"));
    }
}
