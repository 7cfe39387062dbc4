//! Annotation dictionaries on pages
//!
//! Builds the `/Redact` markers and `/FreeText` placeholders the pipeline
//! writes, and reads annotations back when importing or baking.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::error::{RedactError, Result};
use crate::geometry::BoundingBox;
use crate::redaction::RedactionAnnotation;
use crate::resources::{
    decode_text_string, encode_text_string, get, get_number, number_array, real, rect_from_array,
    rect_object, resolve, PageSpace,
};

/// Resource name of the placeholder font.
pub const PLACEHOLDER_FONT: &str = "Helv";

/// `/NM` of the placeholders this crate writes.
const PLACEHOLDER_NAME: &[u8] = b"RdxPlaceholder";

/// Annotation flag bit for hidden annotations.
const FLAG_HIDDEN: i64 = 1 << 1;

/// `/DA` values the baker understands: font size and fill color.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DefaultAppearance {
    pub font_size: Option<f64>,
    pub color: Option<[f64; 3]>,
}

/// Parse a default appearance string such as `/Helv 8 Tf 1 1 1 rg`.
pub fn parse_default_appearance(da: &str) -> DefaultAppearance {
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let num = |i: usize| tokens.get(i).and_then(|t| t.parse::<f64>().ok());
    let mut appearance = DefaultAppearance::default();

    for (i, token) in tokens.iter().enumerate() {
        match *token {
            "Tf" if i >= 1 => appearance.font_size = num(i - 1),
            "rg" if i >= 3 => {
                if let (Some(r), Some(g), Some(b)) = (num(i - 3), num(i - 2), num(i - 1)) {
                    appearance.color = Some([r, g, b]);
                }
            }
            "g" if i >= 1 => {
                if let Some(level) = num(i - 1) {
                    appearance.color = Some([level; 3]);
                }
            }
            _ => {}
        }
    }
    appearance
}

fn color_array(rgb: [f64; 3]) -> Object {
    Object::Array(rgb.iter().map(|c| real(*c)).collect())
}

/// `/Redact` marker for one redaction record, in PDF coordinates.
pub fn redact_annotation(mark: &RedactionAnnotation, space: &PageSpace) -> Dictionary {
    let quad_points: Vec<Object> = mark
        .quads
        .iter()
        .flat_map(|quad| space.quad_to_pdf(quad))
        .map(real)
        .collect();

    let mut annot = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Redact",
        "Rect" => rect_object(&space.rect_to_pdf(&mark.rect)),
        "QuadPoints" => quad_points,
        // Outline red before applying, solid black afterwards
        "C" => color_array([1.0, 0.0, 0.0]),
        "IC" => color_array([0.0, 0.0, 0.0]),
    };
    if !mark.content.is_empty() {
        annot.set("Contents", encode_text_string(&mark.content));
        annot.set("OverlayText", encode_text_string(&mark.content));
    }
    annot
}

/// `/FreeText` placeholder: white Helvetica label on a solid black box.
pub fn placeholder_annotation(rect: &BoundingBox, label: &str, font_size: f64) -> Dictionary {
    let da = format!("/{} {} Tf 1 1 1 rg", PLACEHOLDER_FONT, font_size);
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "FreeText",
        "Rect" => rect_object(rect),
        "Contents" => encode_text_string(label),
        "DA" => Object::string_literal(da),
        "C" => color_array([0.0, 0.0, 0.0]),
        "BS" => dictionary! { "W" => 0 },
        "NM" => Object::string_literal(PLACEHOLDER_NAME),
        // Print
        "F" => 4,
    }
}

fn is_placeholder(dict: &Dictionary) -> bool {
    matches!(dict.get(b"NM"), Ok(Object::String(name, _)) if name.as_slice() == PLACEHOLDER_NAME)
}

/// Entries of a page's `/Annots` array, with the array itself resolved.
pub fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    match get(doc, page, b"Annots") {
        Some(Object::Array(entries)) => entries.clone(),
        _ => Vec::new(),
    }
}

pub fn add_annotation_to_page(
    doc: &mut Document,
    page_id: ObjectId,
    annot_id: ObjectId,
) -> Result<()> {
    let mut entries = page_annotations(doc, page_id);
    entries.push(Object::Reference(annot_id));
    set_page_annotations(doc, page_id, entries)
}

/// Drop the given annotations from a page and delete their objects.
pub fn remove_annotations(doc: &mut Document, page_id: ObjectId, ids: &[ObjectId]) -> Result<()> {
    let entries: Vec<Object> = page_annotations(doc, page_id)
        .into_iter()
        .filter(|entry| !matches!(entry, Object::Reference(id) if ids.contains(id)))
        .collect();
    set_page_annotations(doc, page_id, entries)?;
    for id in ids {
        doc.objects.remove(id);
    }
    Ok(())
}

/// Delete every annotation whose `/Rect` overlaps one of `regions` (PDF
/// space). Redaction markers and placeholders stay. Returns how many went.
pub fn remove_annotations_under(
    doc: &mut Document,
    page_id: ObjectId,
    regions: &[BoundingBox],
) -> Result<usize> {
    let mut kept = Vec::new();
    let mut removed_ids = Vec::new();
    let mut removed = 0;

    for entry in page_annotations(doc, page_id) {
        let covered = match resolve(doc, &entry) {
            Object::Dictionary(dict) => {
                let marker = matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == b"Redact");
                let rect = get(doc, dict, b"Rect")
                    .and_then(|r| number_array(doc, r))
                    .and_then(|values| rect_from_array(&values));
                !marker
                    && !is_placeholder(dict)
                    && rect.map_or(false, |rect| regions.iter().any(|r| r.overlaps(&rect)))
            }
            _ => false,
        };
        if covered {
            removed += 1;
            if let Object::Reference(id) = entry {
                removed_ids.push(id);
            }
        } else {
            kept.push(entry);
        }
    }

    if removed > 0 {
        set_page_annotations(doc, page_id, kept)?;
        for id in &removed_ids {
            doc.objects.remove(id);
        }
        tracing::debug!("Removed {} annotations under redactions on {:?}", removed, page_id);
    }
    Ok(removed)
}

/// Take every annotation of the given subtype off a page and return them.
pub fn take_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    subtype: &[u8],
) -> Result<Vec<PageAnnotation>> {
    let mut taken = Vec::new();
    let mut kept = Vec::new();

    for entry in page_annotations(doc, page_id) {
        let matching = match resolve(doc, &entry) {
            Object::Dictionary(dict)
                if matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == subtype) =>
            {
                Some(dict.clone())
            }
            _ => None,
        };
        match matching {
            Some(dict) => taken.push(PageAnnotation {
                id: entry.as_reference().ok(),
                dict,
            }),
            None => kept.push(entry),
        }
    }

    if !taken.is_empty() {
        set_page_annotations(doc, page_id, kept)?;
        for id in taken.iter().filter_map(|a| a.id) {
            doc.objects.remove(&id);
        }
    }
    Ok(taken)
}

fn set_page_annotations(doc: &mut Document, page_id: ObjectId, entries: Vec<Object>) -> Result<()> {
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| RedactError::OperationError(e.to_string()))?;
    if entries.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(entries));
    }
    Ok(())
}

/// An annotation as read from a page.
#[derive(Debug, Clone)]
pub struct PageAnnotation {
    /// `None` for annotations stored inline in `/Annots`.
    pub id: Option<ObjectId>,
    pub dict: Dictionary,
}

impl PageAnnotation {
    pub fn subtype(&self) -> &[u8] {
        match self.dict.get(b"Subtype") {
            Ok(Object::Name(name)) => name.as_slice(),
            _ => &[],
        }
    }

    pub fn rect(&self, doc: &Document) -> Option<BoundingBox> {
        self.dict
            .get(b"Rect")
            .ok()
            .and_then(|r| number_array(doc, r))
            .and_then(|values| rect_from_array(&values))
    }

    /// QuadPoints in PDF coordinates, in groups of eight.
    pub fn quad_points(&self, doc: &Document) -> Vec<[f64; 8]> {
        self.dict
            .get(b"QuadPoints")
            .ok()
            .and_then(|q| number_array(doc, q))
            .map(|values| {
                values
                    .chunks_exact(8)
                    .filter_map(|chunk| <[f64; 8]>::try_from(chunk).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contents(&self, doc: &Document) -> String {
        match get(doc, &self.dict, b"Contents") {
            Some(Object::String(bytes, _)) => decode_text_string(bytes),
            _ => String::new(),
        }
    }

    pub fn default_appearance(&self, doc: &Document) -> DefaultAppearance {
        match get(doc, &self.dict, b"DA") {
            Some(Object::String(bytes, _)) => {
                parse_default_appearance(&String::from_utf8_lossy(bytes))
            }
            _ => DefaultAppearance::default(),
        }
    }

    pub fn is_hidden(&self, doc: &Document) -> bool {
        get_number(doc, &self.dict, b"F").map_or(false, |flags| (flags as i64) & FLAG_HIDDEN != 0)
    }
}

/// Annotations of a page that resolve to dictionaries.
pub fn read_page_annotations(doc: &Document, page_id: ObjectId) -> Vec<PageAnnotation> {
    page_annotations(doc, page_id)
        .iter()
        .filter_map(|entry| {
            let id = match entry {
                Object::Reference(id) => Some(*id),
                _ => None,
            };
            match resolve(doc, entry) {
                Object::Dictionary(dict) => Some(PageAnnotation {
                    id,
                    dict: dict.clone(),
                }),
                _ => None,
            }
        })
        .collect()
}
