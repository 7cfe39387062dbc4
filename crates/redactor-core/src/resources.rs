//! Object lookups shared by the document engine
//!
//! lopdf hands back raw objects; these helpers follow references, read
//! numbers of either kind and resolve inherited page attributes.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{RedactError, Result};
use crate::geometry::{BoundingBox, Point, Quad};

/// Reference chains longer than this are treated as broken.
const MAX_REFERENCE_DEPTH: usize = 32;

/// Follow indirect references until a direct object is reached.
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_REFERENCE_DEPTH {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(next) => obj = next,
                Err(_) => return &Object::Null,
            },
            _ => return obj,
        }
    }
    &Object::Null
}

pub fn get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().map(|obj| resolve(doc, obj))
}

pub fn get_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    match get(doc, dict, key)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

pub fn get_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match get(doc, dict, key)? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

pub fn get_number(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<f64> {
    get(doc, dict, key).and_then(as_number)
}

pub fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// All-numeric array, references resolved.
pub fn number_array(doc: &Document, obj: &Object) -> Option<Vec<f64>> {
    match resolve(doc, obj) {
        Object::Array(items) => items
            .iter()
            .map(|item| as_number(resolve(doc, item)))
            .collect(),
        _ => None,
    }
}

pub fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

pub fn rect_object(rect: &BoundingBox) -> Object {
    Object::Array(vec![
        real(rect.x0),
        real(rect.y0),
        real(rect.x1),
        real(rect.y1),
    ])
}

pub fn rect_from_array(values: &[f64]) -> Option<BoundingBox> {
    match values {
        [x0, y0, x1, y1, ..] => Some(BoundingBox::new(*x0, *y0, *x1, *y1)),
        _ => None,
    }
}

fn page_dict(doc: &Document, page_id: ObjectId) -> Result<&Dictionary> {
    doc.get_dictionary(page_id)
        .map_err(|e| RedactError::OperationError(format!("Page {:?}: {}", page_id, e)))
}

/// Look up a page attribute, walking up the page tree when it is inherited.
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = page_dict(doc, page_id).ok()?;
    for _ in 0..MAX_REFERENCE_DEPTH {
        if let Some(value) = get(doc, dict, key) {
            return Some(value);
        }
        dict = get_dict(doc, dict, b"Parent")?;
    }
    None
}

/// Effective resource dictionary of a page.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    match inherited(doc, page_id, b"Resources") {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

/// Store `obj` under `/Resources/<category>/<name>` of a page.
///
/// Inherited or shared resource dictionaries are copied onto the page first,
/// so other pages never see the new entry.
pub fn set_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    name: &[u8],
    obj: Object,
) -> Result<()> {
    let mut resources = page_resources(doc, page_id);
    let mut entries = match resources.get(category).ok().map(|o| resolve(doc, o)) {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    entries.set(name.to_vec(), obj);
    resources.set(category.to_vec(), Object::Dictionary(entries));

    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| RedactError::OperationError(e.to_string()))?;
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Decoded bytes of a stream. Streams without filters are returned as stored.
pub fn stream_content(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream
            .decompressed_content()
            .map_err(|e| RedactError::ParseError(format!("Stream decode: {}", e)))
    } else {
        Ok(stream.content.clone())
    }
}

/// Flate-compress `content` into a stream with `dict`. Any filters already
/// in `dict` are replaced.
pub fn compressed_stream(mut dict: Dictionary, content: &[u8]) -> Result<Stream> {
    let compression_failed =
        |e: std::io::Error| RedactError::OperationError(format!("Compression failed: {}", e));
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).map_err(compression_failed)?;
    let compressed = encoder.finish().map_err(compression_failed)?;

    dict.remove(b"DecodeParms");
    dict.remove(b"Length");
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed))
}

/// Replace a page's content with a single Flate-compressed stream.
pub fn replace_page_content(doc: &mut Document, page_id: ObjectId, content: &[u8]) -> Result<()> {
    let stream = compressed_stream(Dictionary::new(), content)?;
    let stream_id = doc.add_object(stream);
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| RedactError::OperationError(e.to_string()))?;
    page.set("Contents", Object::Reference(stream_id));
    Ok(())
}

/// Maps between PDF user space and page space for one page.
///
/// Page space is the page as a viewer shows it: the CropBox (clipped to the
/// MediaBox) turned clockwise by `/Rotate`, with its origin at the top-left
/// corner and y growing downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpace {
    pub view_box: BoundingBox,
    /// Clockwise quarter turns: 0, 90, 180 or 270.
    pub rotate: u16,
}

impl PageSpace {
    /// Unrotated page space over `view_box`.
    pub fn new(view_box: BoundingBox) -> Self {
        Self {
            view_box,
            rotate: 0,
        }
    }

    pub fn for_page(doc: &Document, page_id: ObjectId) -> Result<Self> {
        let page_box = |key: &[u8]| {
            inherited(doc, page_id, key)
                .and_then(|obj| number_array(doc, obj))
                .and_then(|values| rect_from_array(&values))
        };
        let media_box = page_box(b"MediaBox").unwrap_or(BoundingBox::new(0.0, 0.0, 612.0, 792.0));
        if media_box.area() <= 0.0 {
            return Err(RedactError::ParseError(format!(
                "Page {:?} has an empty MediaBox",
                page_id
            )));
        }
        let view_box = page_box(b"CropBox")
            .and_then(|crop| crop.intersection(&media_box))
            .filter(|crop| crop.area() > 0.0)
            .unwrap_or(media_box);

        let rotate = match inherited(doc, page_id, b"Rotate").and_then(as_number) {
            Some(degrees) if degrees.fract() == 0.0 && (degrees as i64) % 90 == 0 => {
                (degrees as i64).rem_euclid(360) as u16
            }
            Some(degrees) => {
                tracing::debug!("Ignoring /Rotate {} on page {:?}", degrees, page_id);
                0
            }
            None => 0,
        };
        Ok(Self { view_box, rotate })
    }

    /// Same view box without the rotation.
    pub fn unrotated(&self) -> Self {
        Self::new(self.view_box)
    }

    /// Page rectangle in page space.
    pub fn bounds(&self) -> BoundingBox {
        let (w, h) = (self.view_box.width(), self.view_box.height());
        match self.rotate {
            90 | 270 => BoundingBox::new(0.0, 0.0, h, w),
            _ => BoundingBox::new(0.0, 0.0, w, h),
        }
    }

    pub fn to_page(&self, x: f64, y: f64) -> Point {
        let b = &self.view_box;
        match self.rotate {
            90 => Point::new(y - b.y0, x - b.x0),
            180 => Point::new(b.x1 - x, y - b.y0),
            270 => Point::new(b.y1 - y, b.x1 - x),
            _ => Point::new(x - b.x0, b.y1 - y),
        }
    }

    pub fn to_pdf(&self, p: Point) -> (f64, f64) {
        let b = &self.view_box;
        match self.rotate {
            90 => (p.y + b.x0, p.x + b.y0),
            180 => (b.x1 - p.x, p.y + b.y0),
            270 => (b.x1 - p.y, b.y1 - p.x),
            _ => (p.x + b.x0, b.y1 - p.y),
        }
    }

    pub fn rect_to_pdf(&self, rect: &BoundingBox) -> BoundingBox {
        let (x0, y0) = self.to_pdf(Point::new(rect.x0, rect.y0));
        let (x1, y1) = self.to_pdf(Point::new(rect.x1, rect.y1));
        BoundingBox::new(x0, y0, x1, y1)
    }

    pub fn rect_to_page(&self, rect: &BoundingBox) -> BoundingBox {
        let a = self.to_page(rect.x0, rect.y0);
        let b = self.to_page(rect.x1, rect.y1);
        BoundingBox::new(a.x, a.y, b.x, b.y)
    }

    /// Page-space quad as PDF QuadPoints values, corner order kept.
    pub fn quad_to_pdf(&self, quad: &Quad) -> [f64; 8] {
        let mut out = [0.0; 8];
        for (i, corner) in quad.corners().iter().enumerate() {
            let (x, y) = self.to_pdf(*corner);
            out[2 * i] = x;
            out[2 * i + 1] = y;
        }
        out
    }

    pub fn quad_to_page(&self, values: &[f64; 8]) -> Quad {
        let p = |i: usize| self.to_page(values[2 * i], values[2 * i + 1]);
        Quad::from_corners(p(0), p(1), p(2), p(3))
    }
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, else
/// single-byte PDFDocEncoding (read as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|b| char::from(*b)).collect()
}

pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, lopdf::StringFormat::Hexadecimal)
}
