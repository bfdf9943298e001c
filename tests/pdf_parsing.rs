//! PDF parsing against documents assembled with `lopdf`.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, ObjectId, Stream};
use pagewise::config::EpubConfig;
use pagewise::context::build_context;
use pagewise::extract::{parse_document, MIME_PDF};
use pagewise::models::{Document, DocumentKind, RenderUnit};
use tokio_util::sync::CancellationToken;

const PAGE_TEXT: [&str; 3] = [
    "Call me Ishmael.",
    "The whale surfaced.",
    "Everyone survives.",
];

fn page_content(text: &str) -> Vec<u8> {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 18.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    content.encode().unwrap()
}

fn dest(page: ObjectId) -> Object {
    Object::Array(vec![Object::Reference(page), "Fit".into()])
}

/// Three pages with an outline of:
///
/// ```text
/// Part One            (URI action, external)
///   Chapter 1         -> page 2
/// Broken              (unknown named destination)
/// Appendix            -> page 3 via the /Names /Dests tree
/// ```
fn build_pdf() -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let page_ids: Vec<ObjectId> = PAGE_TEXT
        .iter()
        .map(|text| {
            let content_id = doc.add_object(Stream::new(dictionary! {}, page_content(text)));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            })
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let outlines_id = doc.new_object_id();
    let part_id = doc.new_object_id();
    let chapter_id = doc.new_object_id();
    let broken_id = doc.new_object_id();
    let appendix_id = doc.new_object_id();

    doc.objects.insert(
        part_id,
        Object::Dictionary(dictionary! {
            "Title" => Object::string_literal("Part One"),
            "Parent" => outlines_id,
            "First" => chapter_id,
            "Last" => chapter_id,
            "Next" => broken_id,
            "A" => dictionary! {
                "S" => "URI",
                "URI" => Object::string_literal("https://example.com/part-one"),
            },
        }),
    );
    doc.objects.insert(
        chapter_id,
        Object::Dictionary(dictionary! {
            "Title" => Object::string_literal("Chapter 1"),
            "Parent" => part_id,
            "Dest" => dest(page_ids[1]),
        }),
    );
    doc.objects.insert(
        broken_id,
        Object::Dictionary(dictionary! {
            "Title" => Object::string_literal("Broken"),
            "Parent" => outlines_id,
            "Prev" => part_id,
            "Next" => appendix_id,
            "Dest" => "nowhere",
        }),
    );
    doc.objects.insert(
        appendix_id,
        Object::Dictionary(dictionary! {
            "Title" => Object::string_literal("Appendix"),
            "Parent" => outlines_id,
            "Prev" => broken_id,
            "Dest" => Object::string_literal("appendix"),
        }),
    );
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => part_id,
            "Last" => appendix_id,
            "Count" => 4,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "Outlines" => outlines_id,
        "Names" => dictionary! {
            "Dests" => dictionary! {
                "Names" => vec![Object::string_literal("appendix"), dest(page_ids[2])],
            },
        },
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Synthetic Handbook"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn parse(bytes: Vec<u8>) -> Document {
    parse_document(
        bytes,
        Some(MIME_PDF),
        "handbook.pdf",
        &EpubConfig::default(),
        &CancellationToken::new(),
    )
    .unwrap()
}

#[test]
fn pages_are_extracted_in_order() {
    let doc = parse(build_pdf());

    assert_eq!(doc.kind, DocumentKind::Pdf);
    assert_eq!(doc.title, "Synthetic Handbook");
    assert_eq!(doc.page_count(), 3);
    for (page, expected) in doc.pages().iter().zip(PAGE_TEXT) {
        assert!(page.contains(expected), "{:?} lacks {:?}", page, expected);
        assert_eq!(page.trim(), page.as_str());
        assert!(!page.contains("  "));
    }
}

#[test]
fn render_payload_keeps_original_bytes() {
    let bytes = build_pdf();
    let doc = parse(bytes.clone());

    for (i, unit) in doc.render_payload().iter().enumerate() {
        match unit {
            RenderUnit::PdfPage {
                source,
                page_number,
            } => {
                assert_eq!(&source[..], &bytes[..]);
                assert_eq!(*page_number as usize, i + 1);
            }
            other => panic!("expected a PDF page, got {:?}", other),
        }
    }
}

#[test]
fn unresolved_outline_nodes_are_dropped_but_children_kept() {
    let doc = parse(build_pdf());

    let outline: Vec<(&str, usize, usize)> = doc
        .outline()
        .iter()
        .map(|e| (e.title.as_str(), e.page_index, e.level))
        .collect();
    assert_eq!(outline, vec![("Chapter 1", 1, 1), ("Appendix", 2, 0)]);
}

#[test]
fn context_never_reaches_past_current_page() {
    let doc = parse(build_pdf());

    let context = build_context(doc.pages(), 1);
    assert!(context.contains("Call me Ishmael."));
    assert!(context.contains("The whale surfaced."));
    assert!(!context.contains("Everyone survives."));
}

/// One page whose content stream is exactly `operations`.
fn single_page_pdf(operations: Vec<Operation>) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content { operations }.encode().unwrap();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[test]
fn separate_text_runs_are_joined_with_spaces() {
    let bytes = single_page_pdf(vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 700.into()]),
        Operation::new("Tj", vec![Object::string_literal("Hello")]),
        Operation::new("Td", vec![40.into(), 0.into()]),
        Operation::new("Tj", vec![Object::string_literal("World")]),
        Operation::new("ET", vec![]),
    ]);
    let doc = parse(bytes);
    assert_eq!(doc.pages()[0], "Hello World");
}

#[test]
fn kerned_array_keeps_word_gaps() {
    let bytes = single_page_pdf(vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new(
            "TJ",
            vec![Object::Array(vec![
                Object::string_literal("Sea"),
                (-20).into(),
                Object::string_literal("son"),
                (-250).into(),
                Object::string_literal("ends"),
            ])],
        ),
        Operation::new("'", vec![Object::string_literal("Next line")]),
        Operation::new("ET", vec![]),
    ]);
    let doc = parse(bytes);
    assert_eq!(doc.pages()[0], "Season ends Next line");
}
