//! Flattening annotations into page content
//!
//! After baking a page has no annotations left: placeholders become a filled
//! box with their label, redaction markers become an outline and anything
//! else keeps its normal appearance as a form XObject drawn into the page.
//! Annotations without an appearance are dropped.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};

use crate::annotations::{read_page_annotations, remove_annotations, PageAnnotation, PLACEHOLDER_FONT};
use crate::content::Matrix;
use crate::error::{RedactError, Result};
use crate::fonts::{encode_win_ansi, helvetica_text_width};
use crate::geometry::BoundingBox;
use crate::resources::{
    get, get_dict, number_array, real, rect_from_array, replace_page_content, resolve,
    set_page_resource,
};

/// Cap height of Helvetica, as a fraction of the font size.
const CAP_HEIGHT: f64 = 0.718;
const LABEL_PADDING: f64 = 2.0;
/// Labels that only fit below this size are left off.
const MIN_LABEL_SIZE: f64 = 4.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BakeStats {
    pub flattened: usize,
    pub dropped: usize,
}

/// Flatten every annotation on a page. `default_font_size` is used for
/// placeholders whose `/DA` carries no size.
pub fn bake_page(doc: &mut Document, page_id: ObjectId, default_font_size: f64) -> Result<BakeStats> {
    let annotations = read_page_annotations(doc, page_id);
    let mut stats = BakeStats::default();
    let mut ops: Vec<Operation> = Vec::new();
    let mut needs_font = false;
    let mut forms: Vec<(String, ObjectId)> = Vec::new();

    for annot in &annotations {
        if annot.is_hidden(doc) || annot.subtype() == b"Popup" {
            stats.dropped += 1;
            continue;
        }
        let Some(rect) = annot.rect(doc) else {
            stats.dropped += 1;
            continue;
        };

        let baked = match annot.subtype() {
            b"Redact" => Some(marker_outline(doc, annot, &rect)),
            b"FreeText" if !has_appearance(doc, annot) => {
                let placeholder = placeholder_ops(doc, annot, &rect, default_font_size);
                needs_font |= placeholder.iter().any(|op| op.operator == "Tf");
                Some(placeholder)
            }
            _ => appearance_form(doc, annot).map(|(form_id, form_ops)| {
                let name = format!("RdxAnnot{}", forms.len());
                forms.push((name.clone(), form_id));
                form_ops(&name, &rect)
            }),
        };

        match baked {
            Some(annot_ops) => {
                ops.extend(annot_ops);
                stats.flattened += 1;
            }
            None => stats.dropped += 1,
        }
    }

    if !ops.is_empty() {
        if needs_font {
            set_page_resource(
                doc,
                page_id,
                b"Font",
                PLACEHOLDER_FONT.as_bytes(),
                Object::Dictionary(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                }),
            )?;
        }
        for (name, form_id) in &forms {
            set_page_resource(doc, page_id, b"XObject", name.as_bytes(), Object::Reference(*form_id))?;
        }
        append_to_page(doc, page_id, ops)?;
    }

    let ids: Vec<ObjectId> = annotations.iter().filter_map(|a| a.id).collect();
    remove_annotations(doc, page_id, &ids)?;
    if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
        page.remove(b"Annots");
    }

    tracing::debug!(
        "Baked page {:?}: {} flattened, {} dropped",
        page_id,
        stats.flattened,
        stats.dropped
    );
    Ok(stats)
}

/// Remove the interactive form from the catalog.
pub fn drop_acroform(doc: &mut Document) -> Result<()> {
    let root = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| RedactError::ParseError(format!("Missing catalog: {}", e)))?;
    let catalog = doc
        .get_object_mut(root)
        .and_then(Object::as_dict_mut)
        .map_err(|e| RedactError::ParseError(format!("Catalog: {}", e)))?;
    if catalog.remove(b"AcroForm").is_some() {
        tracing::debug!("Dropped AcroForm");
    }
    Ok(())
}

/// Wrap the existing content in `q`/`Q` and draw `ops` after it.
fn append_to_page(doc: &mut Document, page_id: ObjectId, ops: Vec<Operation>) -> Result<()> {
    let existing = crate::content::page_operations(doc, page_id)?;
    let mut operations = Vec::with_capacity(existing.len() + ops.len() + 2);
    operations.push(Operation::new("q", vec![]));
    operations.extend(existing);
    operations.push(Operation::new("Q", vec![]));
    operations.extend(ops);

    let bytes = Content { operations }
        .encode()
        .map_err(|e| RedactError::OperationError(format!("Content encode: {}", e)))?;
    replace_page_content(doc, page_id, &bytes)
}

fn color_ops(doc: &Document, color: Option<&Object>, fill: bool) -> Option<Operation> {
    let values = color.and_then(|c| number_array(doc, c))?;
    let operator = match (values.len(), fill) {
        (1, true) => "g",
        (1, false) => "G",
        (3, true) => "rg",
        (3, false) => "RG",
        (4, true) => "k",
        (4, false) => "K",
        _ => return None,
    };
    Some(Operation::new(operator, values.into_iter().map(real).collect()))
}

fn rect_op(rect: &BoundingBox) -> Operation {
    Operation::new(
        "re",
        vec![
            real(rect.x0),
            real(rect.y0),
            real(rect.width()),
            real(rect.height()),
        ],
    )
}

/// Red outline around each quad of a redaction marker that was not applied.
fn marker_outline(doc: &Document, annot: &PageAnnotation, rect: &BoundingBox) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        color_ops(doc, annot.dict.get(b"C").ok(), false)
            .unwrap_or_else(|| Operation::new("RG", vec![1.into(), 0.into(), 0.into()])),
        Operation::new("w", vec![1.into()]),
    ];
    let quads = annot.quad_points(doc);
    if quads.is_empty() {
        ops.push(rect_op(rect));
    }
    for q in &quads {
        // ul, ur, lr, ll
        ops.push(Operation::new("m", vec![real(q[0]), real(q[1])]));
        ops.push(Operation::new("l", vec![real(q[2]), real(q[3])]));
        ops.push(Operation::new("l", vec![real(q[6]), real(q[7])]));
        ops.push(Operation::new("l", vec![real(q[4]), real(q[5])]));
        ops.push(Operation::new("h", vec![]));
    }
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Font size at which `label` fits in `width`, shrinking from `size`.
/// `None` when it would need to go below [`MIN_LABEL_SIZE`].
fn fit_label(label: &str, size: f64, width: f64) -> Option<f64> {
    let natural = helvetica_text_width(label, size);
    let fitted = if natural <= width {
        size
    } else {
        size * width / natural
    };
    (fitted >= MIN_LABEL_SIZE && !label.is_empty()).then_some(fitted)
}

/// Background box and label of a placeholder without an appearance stream.
fn placeholder_ops(
    doc: &Document,
    annot: &PageAnnotation,
    rect: &BoundingBox,
    default_font_size: f64,
) -> Vec<Operation> {
    let mut ops = vec![Operation::new("q", vec![])];
    if let Some(fill) = color_ops(doc, annot.dict.get(b"C").ok(), true) {
        ops.push(fill);
        ops.push(rect_op(rect));
        ops.push(Operation::new("f", vec![]));
    }

    let da = annot.default_appearance(doc);
    let size = da
        .font_size
        .filter(|s| *s > 0.0)
        .unwrap_or(default_font_size)
        .min(rect.height() * 0.8);
    let padding = LABEL_PADDING.min(rect.width() / 4.0);
    let label = annot.contents(doc);

    if let Some(size) = fit_label(&label, size, rect.width() - 2.0 * padding) {
        let [r, g, b] = da.color.unwrap_or([1.0, 1.0, 1.0]);
        let baseline = rect.y0 + (rect.height() - CAP_HEIGHT * size) / 2.0;
        ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(PLACEHOLDER_FONT.as_bytes().to_vec()), real(size)]),
            Operation::new("rg", vec![real(r), real(g), real(b)]),
            Operation::new("Td", vec![real(rect.x0 + padding), real(baseline)]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(&label), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }
    ops.push(Operation::new("Q", vec![]));
    ops
}

fn has_appearance(doc: &Document, annot: &PageAnnotation) -> bool {
    get_dict(doc, &annot.dict, b"AP").map_or(false, |ap| ap.has(b"N"))
}

/// Normal appearance stream of an annotation, selected by `/AS` when it has
/// several states. Inline streams are moved into their own object.
fn appearance_stream_id(doc: &mut Document, annot: &PageAnnotation) -> Option<ObjectId> {
    let normal = get_dict(doc, &annot.dict, b"AP")?.get(b"N").ok()?.clone();
    let selected = match resolve(doc, &normal) {
        Object::Stream(_) => None,
        Object::Dictionary(states) => {
            let state = match get(doc, &annot.dict, b"AS") {
                Some(Object::Name(name)) => name.clone(),
                _ => return None,
            };
            Some(states.get(&state).ok()?.clone())
        }
        _ => return None,
    };
    let chosen = selected.unwrap_or(normal);
    match chosen {
        Object::Reference(id) => match doc.get_object(id) {
            Ok(Object::Stream(_)) => Some(id),
            _ => None,
        },
        stream @ Object::Stream(_) => Some(doc.add_object(stream)),
        _ => None,
    }
}

type FormOps = Box<dyn FnOnce(&str, &BoundingBox) -> Vec<Operation>>;

/// Appearance form of a generic annotation and a builder for the operators
/// that draw it into the annotation rectangle.
fn appearance_form(doc: &mut Document, annot: &PageAnnotation) -> Option<(ObjectId, FormOps)> {
    let form_id = appearance_stream_id(doc, annot)?;
    let Ok(Object::Stream(stream)) = doc.get_object(form_id) else {
        return None;
    };
    let bbox = stream
        .dict
        .get(b"BBox")
        .ok()
        .and_then(|b| number_array(doc, b))
        .and_then(|b| rect_from_array(&b))?;
    let matrix = stream
        .dict
        .get(b"Matrix")
        .ok()
        .and_then(|m| number_array(doc, m))
        .and_then(|m| Matrix::from_values(&m))
        .unwrap_or(Matrix::IDENTITY);

    let transformed = matrix.transform_rect(&bbox);
    if transformed.width() <= 0.0 || transformed.height() <= 0.0 {
        return None;
    }

    let build: FormOps = Box::new(move |name: &str, rect: &BoundingBox| {
        let sx = rect.width() / transformed.width();
        let sy = rect.height() / transformed.height();
        vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(sx),
                    0.into(),
                    0.into(),
                    real(sy),
                    real(rect.x0 - transformed.x0 * sx),
                    real(rect.y0 - transformed.y0 * sy),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]
    });
    Some((form_id, build))
}
