//! Content removal under redaction regions
//!
//! Rewrites a page's content so that nothing drawn inside the given regions
//! survives: glyphs are cut out of their show operators (replaced by kerning
//! so the rest of the line stays put) and painted paths become no-op path
//! ends. Images are dropped. Form XObjects are scrubbed recursively into a
//! private copy for this page; a form whose content cannot be read is
//! dropped. Each region is then covered with a black box.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use serde::{Deserialize, Serialize};

use crate::content::{decode_operations, page_operations, Effect, Interpreter, Matrix, MAX_FORM_DEPTH};
use crate::error::{RedactError, Result};
use crate::fonts::FontInfo;
use crate::geometry::{BoundingBox, Point};
use crate::resources::{
    as_number, compressed_stream, get, get_dict, page_resources, real, replace_page_content,
    resolve, set_page_resource, stream_content,
};

/// What a removal pass took off the page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovalStats {
    pub glyphs: usize,
    pub images: usize,
    pub forms: usize,
    pub paths: usize,
    /// Annotations lying under a region.
    #[serde(default)]
    pub annotations: usize,
}

impl RemovalStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for RemovalStats {
    fn add_assign(&mut self, other: Self) {
        self.glyphs += other.glyphs;
        self.images += other.images;
        self.forms += other.forms;
        self.paths += other.paths;
        self.annotations += other.annotations;
    }
}

#[derive(Debug, Clone, Copy)]
struct GlyphEdit {
    removed: bool,
    kern: f64,
}

enum Edit {
    Text {
        font: Arc<FontInfo>,
        glyphs: Vec<GlyphEdit>,
    },
    SuppressPaint,
    Drop,
    /// Draw a scrubbed copy of a form instead.
    Redirect(Vec<u8>),
}

/// Operators of one content stream with the covered content taken out.
struct Scrubbed {
    operations: Vec<Operation>,
    stats: RemovalStats,
    /// Scrubbed form copies to register under the stream's XObject resources.
    forms: Vec<(Vec<u8>, ObjectId)>,
}

enum FormScrub {
    Unreadable,
    Untouched,
    Copied { id: ObjectId, stats: RemovalStats },
}

fn touches(regions: &[BoundingBox], bbox: &BoundingBox) -> bool {
    if bbox.area() > 0.0 {
        regions.iter().any(|r| r.overlaps(bbox))
    } else {
        let center = Point::new((bbox.x0 + bbox.x1) / 2.0, (bbox.y0 + bbox.y1) / 2.0);
        regions.iter().any(|r| r.area() > 0.0 && r.contains_point(center))
    }
}

/// Remove everything drawn inside `regions` (PDF user space) from a page and
/// paint black boxes over them.
pub fn scrub_page(
    doc: &mut Document,
    page_id: ObjectId,
    regions: &[BoundingBox],
) -> Result<RemovalStats> {
    let ops = page_operations(doc, page_id)?;
    let resources = page_resources(doc, page_id);
    let scrubbed = scrub_operations(doc, ops, &resources, regions, 0)?;

    for (name, form_id) in &scrubbed.forms {
        set_page_resource(doc, page_id, b"XObject", name, Object::Reference(*form_id))?;
    }

    let mut rewritten = Vec::with_capacity(scrubbed.operations.len() + 2 + 5 * regions.len());
    rewritten.push(Operation::new("q", vec![]));
    rewritten.extend(scrubbed.operations);
    rewritten.push(Operation::new("Q", vec![]));
    for region in regions {
        rewritten.extend(black_box(region));
    }
    replace_page_content(doc, page_id, &encode(rewritten)?)?;

    let stats = scrubbed.stats;
    tracing::debug!(
        "Scrubbed page {:?}: {} glyphs, {} images, {} forms, {} paths",
        page_id,
        stats.glyphs,
        stats.images,
        stats.forms,
        stats.paths
    );
    Ok(stats)
}

fn encode(operations: Vec<Operation>) -> Result<Vec<u8>> {
    Content { operations }
        .encode()
        .map_err(|e| RedactError::OperationError(format!("Content encode: {}", e)))
}

/// Names already used in the `/XObject` resources.
fn xobject_names(doc: &Document, resources: &Dictionary) -> HashSet<Vec<u8>> {
    get_dict(doc, resources, b"XObject")
        .map(|xobjects| xobjects.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default()
}

fn fresh_name(taken: &mut HashSet<Vec<u8>>) -> Vec<u8> {
    let name = (0..)
        .map(|n| format!("RdxForm{}", n).into_bytes())
        .find(|name| !taken.contains(name))
        .unwrap_or_default();
    taken.insert(name.clone());
    name
}

/// Scrub one content stream whose user space is the space of `regions`.
fn scrub_operations(
    doc: &mut Document,
    ops: Vec<Operation>,
    resources: &Dictionary,
    regions: &[BoundingBox],
    depth: usize,
) -> Result<Scrubbed> {
    let mut edits: HashMap<usize, Edit> = HashMap::new();
    let mut stats = RemovalStats::default();
    let mut touched_forms: Vec<(usize, Vec<u8>, Matrix)> = Vec::new();

    Interpreter::new(doc).run(&ops, resources, &mut |at, _, effect| match effect {
        Effect::Text { font, glyphs } => {
            let glyph_edits: Vec<GlyphEdit> = glyphs
                .iter()
                .map(|g| GlyphEdit {
                    removed: touches(regions, &g.bbox),
                    kern: g.removal_kern.unwrap_or(0.0),
                })
                .collect();
            let removed = glyph_edits.iter().filter(|g| g.removed).count();
            if removed > 0 {
                stats.glyphs += removed;
                edits.insert(
                    at.index,
                    Edit::Text {
                        font: font.clone(),
                        glyphs: glyph_edits,
                    },
                );
            }
        }
        Effect::Paint { bbox, .. } if touches(regions, bbox) => {
            stats.paths += 1;
            edits.insert(at.index, Edit::SuppressPaint);
        }
        Effect::Image { bbox } if touches(regions, bbox) => {
            stats.images += 1;
            edits.insert(at.index, Edit::Drop);
        }
        Effect::Form { bbox, name, matrix } if touches(regions, bbox) => {
            touched_forms.push((at.index, name.clone(), *matrix));
        }
        _ => {}
    });

    let mut taken = xobject_names(doc, resources);
    let mut forms = Vec::new();
    for (index, name, matrix) in touched_forms {
        match scrub_form(doc, resources, &name, &matrix, regions, depth)? {
            FormScrub::Untouched => {}
            FormScrub::Copied { id, stats: inner } => {
                stats += inner;
                let copy = fresh_name(&mut taken);
                forms.push((copy.clone(), id));
                edits.insert(index, Edit::Redirect(copy));
            }
            FormScrub::Unreadable => {
                stats.forms += 1;
                edits.insert(index, Edit::Drop);
            }
        }
    }

    let mut operations = Vec::with_capacity(ops.len());
    for (index, op) in ops.into_iter().enumerate() {
        match edits.remove(&index) {
            None => operations.push(op),
            Some(Edit::Drop) => {}
            Some(Edit::SuppressPaint) => operations.push(Operation::new("n", vec![])),
            Some(Edit::Redirect(name)) => {
                operations.push(Operation::new("Do", vec![Object::Name(name)]))
            }
            Some(Edit::Text { font, glyphs }) => {
                operations.extend(rewrite_show(&op, &font, &glyphs))
            }
        }
    }

    Ok(Scrubbed {
        operations,
        stats,
        forms,
    })
}

/// Scrub the form drawn as `name` with `matrix` into a new form object.
fn scrub_form(
    doc: &mut Document,
    resources: &Dictionary,
    name: &[u8],
    matrix: &Matrix,
    regions: &[BoundingBox],
    depth: usize,
) -> Result<FormScrub> {
    if depth + 1 >= MAX_FORM_DEPTH {
        return Ok(FormScrub::Unreadable);
    }
    let Some(inverse) = matrix.invert() else {
        return Ok(FormScrub::Unreadable);
    };

    let (dict, ops) = {
        let Some(Object::Stream(stream)) =
            get_dict(doc, resources, b"XObject").and_then(|xobjects| get(doc, xobjects, name))
        else {
            return Ok(FormScrub::Unreadable);
        };
        match stream_content(stream).and_then(|bytes| decode_operations(&bytes)) {
            Ok(ops) => (stream.dict.clone(), ops),
            Err(e) => {
                tracing::debug!(
                    "Dropping unreadable form /{}: {}",
                    String::from_utf8_lossy(name),
                    e
                );
                return Ok(FormScrub::Unreadable);
            }
        }
    };
    let mut form_resources = get_dict(doc, &dict, b"Resources")
        .cloned()
        .unwrap_or_else(|| resources.clone());

    let local: Vec<BoundingBox> = regions.iter().map(|r| inverse.transform_rect(r)).collect();
    let scrubbed = scrub_operations(doc, ops, &form_resources, &local, depth + 1)?;
    if scrubbed.stats.is_empty() {
        return Ok(FormScrub::Untouched);
    }

    if !scrubbed.forms.is_empty() {
        let mut xobjects = match form_resources.get(b"XObject").ok().map(|o| resolve(doc, o)) {
            Some(Object::Dictionary(d)) => d.clone(),
            _ => Dictionary::new(),
        };
        for (copy, id) in scrubbed.forms {
            xobjects.set(copy, Object::Reference(id));
        }
        form_resources.set("XObject", Object::Dictionary(xobjects));
    }

    let mut dict = dict;
    dict.set("Resources", Object::Dictionary(form_resources));
    let stream = compressed_stream(dict, &encode(scrubbed.operations)?)?;
    Ok(FormScrub::Copied {
        id: doc.add_object(stream),
        stats: scrubbed.stats,
    })
}

pub(crate) fn black_box(region: &BoundingBox) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("g", vec![0.into()]),
        Operation::new(
            "re",
            vec![
                real(region.x0),
                real(region.y0),
                real(region.width()),
                real(region.height()),
            ],
        ),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Accumulates a `TJ` array, merging adjacent strings and adjacent kerns.
#[derive(Default)]
struct ShowArray {
    items: Vec<Object>,
    run: Vec<u8>,
    kern: f64,
}

impl ShowArray {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.flush_kern();
        self.run.extend_from_slice(bytes);
    }

    fn push_kern(&mut self, kern: f64) {
        self.flush_run();
        self.kern += kern;
    }

    fn flush_run(&mut self) {
        if !self.run.is_empty() {
            let run = std::mem::take(&mut self.run);
            self.items.push(Object::String(run, StringFormat::Hexadecimal));
        }
    }

    fn flush_kern(&mut self) {
        if self.kern != 0.0 {
            self.items.push(real(self.kern));
            self.kern = 0.0;
        }
    }

    fn finish(mut self) -> Object {
        self.flush_run();
        self.flush_kern();
        Object::Array(self.items)
    }
}

/// Rebuild a text-showing operator without its removed glyphs.
fn rewrite_show(op: &Operation, font: &FontInfo, glyphs: &[GlyphEdit]) -> Vec<Operation> {
    let mut out = Vec::new();
    let mut array = ShowArray::default();
    let mut edits = glyphs.iter();

    let mut show_string = |bytes: &[u8], array: &mut ShowArray| {
        for code in font.codes(bytes) {
            match edits.next() {
                Some(edit) if edit.removed => array.push_kern(edit.kern),
                _ => array.push_bytes(&font.encode_code(code)),
            }
        }
    };

    match op.operator.as_str() {
        "TJ" => {
            if let Some(Object::Array(elements)) = op.operands.first() {
                for element in elements {
                    match element {
                        Object::String(bytes, _) => show_string(bytes.as_slice(), &mut array),
                        other => {
                            if let Some(n) = as_number(other) {
                                array.push_kern(n);
                            }
                        }
                    }
                }
            }
        }
        operator => {
            if operator == "\"" {
                out.push(Operation::new("Tw", op.operands.first().cloned().into_iter().collect()));
                out.push(Operation::new("Tc", op.operands.get(1).cloned().into_iter().collect()));
            }
            if operator != "Tj" {
                out.push(Operation::new("T*", vec![]));
            }
            if let Some(Object::String(bytes, _)) = op.operands.last() {
                show_string(bytes.as_slice(), &mut array);
            }
        }
    }

    out.push(Operation::new("TJ", vec![array.finish()]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::tests::page_with_content;
    use crate::resources::PageSpace;
    use crate::words::segment_words;
    use lopdf::{dictionary, Stream};

    fn words_after(doc: &Document, page_id: ObjectId) -> Vec<String> {
        let space = PageSpace::for_page(doc, page_id).unwrap();
        let events = crate::content::page_glyph_events(doc, page_id, space).unwrap();
        segment_words(&events).into_iter().map(|w| w.text).collect()
    }

    #[test]
    fn test_removes_only_covered_word() {
        let (mut doc, page_id) = page_with_content("BT /F1 10 Tf 20 100 Td (Hi there) Tj ET");
        // "Hi" spans x 20..29.44 on the baseline at y 100
        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(19.0, 95.0, 29.0, 110.0)]).unwrap();

        assert_eq!(stats.glyphs, 2);
        assert_eq!(words_after(&doc, page_id), vec!["there"]);
    }

    #[test]
    fn test_remaining_glyphs_keep_their_position() {
        let (mut doc, page_id) = page_with_content("BT /F1 10 Tf 20 100 Td (Hi there) Tj ET");
        let space = PageSpace::for_page(&doc, page_id).unwrap();
        let before = crate::content::page_glyph_events(&doc, page_id, space).unwrap();
        scrub_page(&mut doc, page_id, &[BoundingBox::new(19.0, 95.0, 29.0, 110.0)]).unwrap();
        let after = crate::content::page_glyph_events(&doc, page_id, space).unwrap();

        let last_quad = |events: &[crate::words::GlyphEvent]| {
            events.iter().rev().find_map(|e| match e {
                crate::words::GlyphEvent::Char { quad, .. } => Some(*quad),
                _ => None,
            })
        };
        let (a, b) = (last_quad(&before).unwrap(), last_quad(&after).unwrap());
        for (x, y) in a.0.iter().zip(b.0.iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_paths_images_and_black_box() {
        let (mut doc, page_id) = page_with_content("0.5 g 10 10 50 50 re f 150 150 20 20 re f");
        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(0.0, 0.0, 30.0, 30.0)]).unwrap();
        assert_eq!(stats.paths, 1);

        let ops = page_operations(&doc, page_id).unwrap();
        let operators: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(
            operators,
            vec!["q", "g", "re", "n", "re", "f", "Q", "q", "g", "re", "f", "Q"]
        );
    }

    #[test]
    fn test_quote_operator_is_split() {
        let op = Operation::new("\"", vec![1.into(), 2.into(), Object::string_literal("ab")]);
        let font = FontInfo::default();
        let edits = [
            GlyphEdit {
                removed: true,
                kern: -500.0,
            },
            GlyphEdit {
                removed: false,
                kern: -556.0,
            },
        ];
        let out = rewrite_show(&op, &font, &edits);
        let operators: Vec<&str> = out.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(operators, vec!["Tw", "Tc", "T*", "TJ"]);

        let Object::Array(items) = &out[3].operands[0] else {
            panic!("TJ operand must be an array");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Object::Real(k) if k == -500.0));
        assert!(matches!(&items[1], Object::String(bytes, _) if bytes == b"b"));
    }

    const WRAPPED_TEXT: &[u8] = b"BT /F1 10 Tf 20 50 Td (Hi there) Tj 0 -20 Td (Unrelated paragraph) Tj ET";

    /// Page whose only content is one form, shifted up by 50 points.
    fn form_wrapped_page(form: Stream) -> (Document, ObjectId, ObjectId) {
        let (mut doc, page_id) = page_with_content("q 1 0 0 1 0 50 cm /Fm0 Do Q");
        let form_id = doc.add_object(form);
        set_page_resource(&mut doc, page_id, b"XObject", b"Fm0", Object::Reference(form_id)).unwrap();
        (doc, page_id, form_id)
    }

    fn form(content: &[u8]) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 200.into(), 150.into()],
            },
            content.to_vec(),
        )
    }

    #[test]
    fn test_form_content_is_scrubbed_in_a_copy() {
        let (mut doc, page_id, form_id) = form_wrapped_page(form(WRAPPED_TEXT));
        assert_eq!(words_after(&doc, page_id), vec!["Hi", "there", "Unrelated", "paragraph"]);

        // "Hi" lands at x 20..29.44 on the baseline y 100 of the page
        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(19.0, 95.0, 29.0, 110.0)]).unwrap();
        assert_eq!((stats.glyphs, stats.forms), (2, 0));
        assert_eq!(words_after(&doc, page_id), vec!["there", "Unrelated", "paragraph"]);

        // Other users of the form still see the original
        match doc.get_object(form_id).unwrap() {
            Object::Stream(original) => assert_eq!(original.content, WRAPPED_TEXT),
            other => panic!("form replaced by {:?}", other),
        }
    }

    #[test]
    fn test_form_touched_only_by_its_box_is_kept() {
        let (mut doc, page_id, _) = form_wrapped_page(form(WRAPPED_TEXT));
        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(150.0, 150.0, 160.0, 160.0)]).unwrap();
        assert!(stats.is_empty());

        let ops = page_operations(&doc, page_id).unwrap();
        assert!(ops
            .iter()
            .any(|op| op.operator == "Do" && matches!(op.operands.first(), Some(Object::Name(n)) if n == b"Fm0")));
    }

    #[test]
    fn test_unreadable_form_is_dropped() {
        // lopdf has no decoder for this filter
        let mut broken = form(b"not run-length data");
        broken.dict.set("Filter", "RunLengthDecode");
        let (mut doc, page_id, _) = form_wrapped_page(broken);

        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(19.0, 95.0, 29.0, 110.0)]).unwrap();
        assert_eq!(stats.forms, 1);
        let ops = page_operations(&doc, page_id).unwrap();
        assert!(ops.iter().all(|op| op.operator != "Do"));
    }

    #[test]
    fn test_untouched_page_keeps_everything() {
        let (mut doc, page_id) = page_with_content("BT /F1 10 Tf 20 100 Td (Hi) Tj ET");
        let stats = scrub_page(&mut doc, page_id, &[BoundingBox::new(150.0, 150.0, 160.0, 160.0)]).unwrap();
        assert!(stats.is_empty());
        assert_eq!(words_after(&doc, page_id), vec!["Hi"]);
    }
}
