//! End-to-end redaction commits on generated documents
//!
//! Run with: cargo test -p redactor-core --test commit

use lopdf::{content::Content, content::Operation, dictionary, Dictionary, Document, Object, Stream};
use pretty_assertions::assert_eq;
use redactor_core::{
    redact_document, run_pipeline, BoundingBox, DocumentEngine, PdfDocument, PipelineOptions,
    Quad, Redaction, RedactionAnnotation, RedactionPart, SessionState,
    SuggestionInput,
};

/// Letter-sized pages, each showing `texts[i]` in 12pt Helvetica at (100, 700).
fn create_text_pdf(texts: &[&str], with_form: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut page_ids = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(text.as_bytes().to_vec(), lopdf::StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
        }),
    );
    let mut catalog = dictionary! { "Type" => "Catalog", "Pages" => pages_id };
    if with_form {
        catalog.set("AcroForm", dictionary! { "Fields" => Vec::<Object>::new() });
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// One letter page drawn entirely by `/Fm0`, carrying a FreeText note whose
/// appearance reads "Secret" over the first line.
fn create_form_wrapped_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let fonts = dictionary! {
        "F1" => doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }),
    };
    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! { "Font" => fonts.clone() },
        },
        b"BT /F1 12 Tf 100 700 Td (Hi there) Tj 0 -50 Td (Unrelated paragraph) Tj ET".to_vec(),
    ));
    let appearance_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 100.into(), 20.into()],
            "Resources" => dictionary! { "Font" => fonts },
        },
        b"BT /F1 10 Tf 2 5 Td (Secret) Tj ET".to_vec(),
    ));
    let note_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "FreeText",
        "Rect" => vec![100.into(), 690.into(), 200.into(), 710.into()],
        "AP" => dictionary! { "N" => appearance_id },
    });
    let content_id = doc.add_object(Stream::new(Dictionary::new(), b"q /Fm0 Do Q".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => dictionary! { "Fm0" => form_id } },
        "Annots" => vec![Object::Reference(note_id)],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn words(bytes: &[u8], page_index: u32) -> Vec<(String, BoundingBox)> {
    PdfDocument::open(bytes)
        .unwrap()
        .page_words(page_index)
        .unwrap()
        .into_iter()
        .map(|w| (w.text, w.bbox))
        .collect()
}

fn texts(bytes: &[u8], page_index: u32) -> Vec<String> {
    words(bytes, page_index).into_iter().map(|(t, _)| t).collect()
}

/// Region drawn around the whole "Hi there" line, in page space.
fn line_region() -> BoundingBox {
    BoundingBox::new(95.0, 80.0, 200.0, 96.0)
}

fn annotation(page_index: u32, rect: BoundingBox, apply: bool) -> RedactionAnnotation {
    RedactionAnnotation {
        page_index,
        quads: vec![Quad::from_rect(&rect)],
        content: String::new(),
        rect,
        apply,
    }
}

#[test]
fn test_apply_replaces_words_with_placeholder_label() {
    let source = create_text_pdf(&["Hi there"], false);
    assert_eq!(texts(&source, 0), vec!["Hi", "there"]);

    let out = run_pipeline::<PdfDocument>(
        &source,
        &[annotation(0, line_region(), true)],
        &PipelineOptions::default(),
    )
    .unwrap();

    let remaining = words(&out.bytes, 0);
    assert!(remaining.iter().all(|(text, _)| text != "Hi" && text != "there"));

    let (_, label_box) = remaining
        .iter()
        .find(|(text, _)| text == "REDACTED")
        .expect("placeholder label should be extractable");
    let center_x = (label_box.x0 + label_box.x1) / 2.0;
    let center_y = (label_box.y0 + label_box.y1) / 2.0;
    let region = line_region();
    assert!(center_x > region.x0 && center_x < region.x1);
    assert!(center_y > region.y0 && center_y < region.y1);
}

#[test]
fn test_runs_are_deterministic() {
    let source = create_text_pdf(&["Hi there", "Second page"], false);
    let annotations = [annotation(0, line_region(), true), annotation(1, line_region(), false)];
    let options = PipelineOptions::default();

    let first = run_pipeline::<PdfDocument>(&source, &annotations, &options).unwrap();
    let second = run_pipeline::<PdfDocument>(&source, &annotations, &options).unwrap();
    assert_eq!(first.report, second.report);
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn test_empty_commit_is_structurally_unchanged() {
    let source = create_text_pdf(&["Hi there", "Second page"], false);
    let out = run_pipeline::<PdfDocument>(&source, &[], &PipelineOptions::default()).unwrap();

    assert_eq!(redactor_core::get_page_count(&out.bytes).unwrap(), 2);
    assert_eq!(texts(&out.bytes, 0), texts(&source, 0));
    assert_eq!(texts(&out.bytes, 1), texts(&source, 1));
    assert!(out.report.removed.is_empty());
}

#[test]
fn test_no_apply_mode_returns_source() {
    let source = create_text_pdf(&["Hi there"], false);
    let options = PipelineOptions {
        apply: false,
        ..PipelineOptions::default()
    };
    let out = run_pipeline::<PdfDocument>(&source, &[annotation(0, line_region(), true)], &options).unwrap();
    assert_eq!(out.bytes, source);
}

#[test]
fn test_only_the_targeted_page_changes() {
    let source = create_text_pdf(&["Hi there", "Second page"], false);
    let out = run_pipeline::<PdfDocument>(
        &source,
        &[annotation(1, line_region(), true)],
        &PipelineOptions::default(),
    )
    .unwrap();

    assert_eq!(texts(&out.bytes, 0), vec!["Hi", "there"]);
    assert!(!texts(&out.bytes, 1).contains(&"Second".to_string()));
}

#[test]
fn test_baking_drops_form_layer_and_annotations() {
    let source = create_text_pdf(&["Hi there"], true);
    let out = run_pipeline::<PdfDocument>(
        &source,
        &[annotation(0, line_region(), false)],
        &PipelineOptions::default(),
    )
    .unwrap();
    assert_eq!(out.report.skipped, 1);

    let doc = Document::load_mem(&out.bytes).unwrap();
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_dictionary(root).unwrap();
    assert!(!catalog.has(b"AcroForm"));
    let page_id = doc.get_pages()[&1];
    assert!(!doc.get_dictionary(page_id).unwrap().has(b"Annots"));
    // Mark-only redactions leave the text in place
    assert_eq!(texts(&out.bytes, 0), vec!["Hi", "there"]);
}

#[test]
fn test_reviewed_suggestions_flow_into_commit() {
    let source = create_text_pdf(&["Hi there"], false);
    let engine = PdfDocument::open(&source).unwrap();
    let hi = engine.search(0, "Hi").unwrap().remove(0);
    let there = engine.search(0, "there").unwrap().remove(0);

    let mut session = SessionState::new();
    let raw = |id: &str, quads: &[Quad]| SuggestionInput {
        id: Some(id.to_string()),
        page_index: 0,
        quads: quads.iter().map(|q| q.0.to_vec()).collect(),
        reason: Some("Name".to_string()),
        ..SuggestionInput::default()
    };
    let report = session.ingest_suggestions(vec![
        raw("hi", &hi),
        raw("there", &there),
        SuggestionInput {
            id: Some("broken".to_string()),
            page_index: 0,
            quads: vec![vec![1.0, 2.0]],
            ..SuggestionInput::default()
        },
    ]);
    assert_eq!((report.accepted, report.skipped), (2, 1));

    // Only "hi" is reviewed; "there" stays indeterminate
    session.accept_suggestion("hi").unwrap();
    let accepted: Vec<Redaction> = session.accepted();
    assert_eq!(accepted.len(), 1);

    let out = redact_document::<PdfDocument>(&source, session.redactions(), &PipelineOptions::default()).unwrap();
    assert_eq!(out.report.applied, 1);
    let remaining = texts(&out.bytes, 0);
    assert!(!remaining.contains(&"Hi".to_string()));
    assert!(remaining.contains(&"there".to_string()));
}

#[test]
fn test_imported_markers_become_redactions() {
    let source = create_text_pdf(&["Hi there"], false);
    let mut engine = PdfDocument::open(&source).unwrap();
    let mut marker = annotation(0, line_region(), true);
    marker.content = "Account".to_string();
    engine.stage_redactions(0, &[marker]).unwrap();
    let marked = engine.serialize().unwrap();

    let mut reopened = PdfDocument::open(&marked).unwrap();
    let imported = reopened.import_annotations().unwrap();
    let (redactions, skipped) = redactor_core::annotations_to_redactions(&imported);
    assert_eq!(skipped, 0);
    assert_eq!(redactions.len(), 1);
    assert_eq!(redactions[0].reason.as_deref(), Some("Account"));
    assert_eq!(redactions[0].parts, vec![RedactionPart::from_bbox(&line_region())]);
    assert!(!redactions[0].is_indeterminate);
}

#[test]
fn test_form_content_and_notes_under_region_are_gone() {
    let source = create_form_wrapped_pdf();
    assert_eq!(texts(&source, 0), vec!["Hi", "there", "Unrelated", "paragraph"]);

    let out = run_pipeline::<PdfDocument>(
        &source,
        &[annotation(0, line_region(), true)],
        &PipelineOptions::default(),
    )
    .unwrap();
    assert_eq!(out.report.removed.annotations, 1);
    assert_eq!(out.report.removed.forms, 0);

    let remaining = texts(&out.bytes, 0);
    for gone in ["Hi", "there", "Secret"] {
        assert!(!remaining.contains(&gone.to_string()), "{} survived: {:?}", gone, remaining);
    }
    assert!(remaining.contains(&"Unrelated".to_string()));
    assert!(remaining.contains(&"paragraph".to_string()));
    assert!(remaining.contains(&"REDACTED".to_string()));
}
