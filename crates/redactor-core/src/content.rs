//! Content stream interpreter
//!
//! Walks a page's operators while tracking the graphics and text state, and
//! reports what each operator puts on the page: positioned glyphs, painted
//! paths, images and form XObjects. Geometry is reported in PDF user space of
//! the page.

use std::collections::HashMap;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::{RedactError, Result};
use crate::fonts::FontInfo;
use crate::geometry::{BoundingBox, Point, Quad};
use crate::resources::{
    as_number, get, get_dict, get_name, number_array, page_resources, rect_from_array,
    stream_content, PageSpace,
};
use crate::words::GlyphEvent;

/// Nested form XObjects deeper than this are not entered.
pub(crate) const MAX_FORM_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn from_values(values: &[f64]) -> Option<Self> {
        match values {
            [a, b, c, d, e, f] => Some(Self::new(*a, *b, *c, *d, *e, *f)),
            _ => None,
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Option<Vec<f64>> = operands.iter().map(as_number).collect();
        Self::from_values(&values?)
    }

    /// `self` applied first, then `next`.
    pub fn then(&self, next: &Matrix) -> Matrix {
        Matrix {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            e: self.e * next.a + self.f * next.c + next.e,
            f: self.e * next.b + self.f * next.d + next.f,
        }
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let (a, b, c, d) = (self.d / det, -self.b / det, -self.c / det, self.a / det);
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn transform_rect(&self, rect: &BoundingBox) -> BoundingBox {
        let corners = [
            self.apply(rect.x0, rect.y0),
            self.apply(rect.x1, rect.y0),
            self.apply(rect.x0, rect.y1),
            self.apply(rect.x1, rect.y1),
        ];
        BoundingBox::from_points(&corners.map(|(x, y)| Point::new(x, y)))
    }

    /// Mean scale factor, for line widths.
    fn scale(&self) -> f64 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }
}

/// One glyph drawn by a text-showing operator.
#[derive(Debug, Clone)]
pub struct PlacedGlyph {
    pub code: u32,
    pub text: String,
    /// Corners in user space: upper-left, upper-right, lower-left, lower-right.
    pub corners: [(f64, f64); 4],
    pub bbox: BoundingBox,
    /// Start and end of the glyph on the baseline.
    pub origin: (f64, f64),
    pub end: (f64, f64),
    /// Effective font size in user space.
    pub size: f64,
    /// `TJ` adjustment that advances exactly as far as this glyph did.
    pub removal_kern: Option<f64>,
    pub fill: f64,
}

/// What an operator contributed to the page.
#[derive(Debug, Clone)]
pub enum Effect {
    Text {
        font: Arc<FontInfo>,
        glyphs: Vec<PlacedGlyph>,
    },
    Paint {
        bbox: BoundingBox,
        fill: Option<f64>,
        stroke: Option<f64>,
    },
    Image {
        bbox: BoundingBox,
    },
    Form {
        bbox: BoundingBox,
        /// Resource name the form was drawn under.
        name: Vec<u8>,
        /// Form space to the user space of the stream that drew it.
        matrix: Matrix,
    },
    None,
}

/// Where an operator sits: its index in its own stream and how many forms deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpLocation {
    pub index: usize,
    pub depth: usize,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    line_width: f64,
    /// Gray levels, 0 black to 1 white.
    fill: f64,
    stroke: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scale: f64,
    leading: f64,
    font: Option<Arc<FontInfo>>,
    font_size: f64,
    rise: f64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            line_width: 1.0,
            fill: 0.0,
            stroke: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            font: None,
            font_size: 0.0,
            rise: 0.0,
        }
    }
}

enum ShowItem<'a> {
    Bytes(&'a [u8]),
    Adjust(f64),
}

fn gray(operands: &[Object]) -> Option<f64> {
    let values: Vec<f64> = operands.iter().filter_map(as_number).collect();
    let level = match values.as_slice() {
        [g] => *g,
        [r, g, b] => 0.299 * r + 0.587 * g + 0.114 * b,
        [c, m, y, k] => 1.0 - (0.3 * c + 0.59 * m + 0.11 * y + k),
        _ => return None,
    };
    Some(level.clamp(0.0, 1.0))
}

fn number(operands: &[Object], i: usize) -> f64 {
    operands.get(i).and_then(as_number).unwrap_or(0.0)
}

/// Operators of a page's content streams, concatenated.
pub fn page_operations(doc: &Document, page_id: ObjectId) -> Result<Vec<Operation>> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| RedactError::ParseError(e.to_string()))?;
    if !page.has(b"Contents") {
        return Ok(Vec::new());
    }
    let bytes = doc
        .get_page_content(page_id)
        .map_err(|e| RedactError::ParseError(format!("Page content: {}", e)))?;
    decode_operations(&bytes)
}

pub fn decode_operations(bytes: &[u8]) -> Result<Vec<Operation>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Content::decode(bytes)
        .map(|content| content.operations)
        .map_err(|e| RedactError::ParseError(format!("Content stream: {}", e)))
}

pub struct Interpreter<'d> {
    doc: &'d Document,
    descend_forms: bool,
}

impl<'d> Interpreter<'d> {
    pub fn new(doc: &'d Document) -> Self {
        Self {
            doc,
            descend_forms: false,
        }
    }

    /// Also report what form XObjects draw, after the form's own `Do` effect.
    pub fn descend_into_forms(mut self) -> Self {
        self.descend_forms = true;
        self
    }

    pub fn run(
        &self,
        ops: &[Operation],
        resources: &Dictionary,
        visit: &mut dyn FnMut(OpLocation, &Operation, &Effect),
    ) {
        self.run_at(ops, resources, Matrix::IDENTITY, 0, visit);
    }

    fn run_at(
        &self,
        ops: &[Operation],
        resources: &Dictionary,
        base: Matrix,
        depth: usize,
        visit: &mut dyn FnMut(OpLocation, &Operation, &Effect),
    ) {
        let mut fonts: HashMap<Vec<u8>, Arc<FontInfo>> = HashMap::new();
        let mut gs = GraphicsState::new(base);
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;
        let mut path: Option<BoundingBox> = None;

        for (index, op) in ops.iter().enumerate() {
            let operands = op.operands.as_slice();
            let mut effect = Effect::None;

            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        gs.ctm = m.then(&gs.ctm);
                    }
                }
                "w" => gs.line_width = number(operands, 0),
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(level) = gray(operands) {
                        gs.fill = level;
                    }
                }
                "G" | "RG" | "K" | "SC" | "SCN" => {
                    if let Some(level) = gray(operands) {
                        gs.stroke = level;
                    }
                }

                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "Tc" => gs.char_spacing = number(operands, 0),
                "Tw" => gs.word_spacing = number(operands, 0),
                "Tz" => gs.horizontal_scale = number(operands, 0) / 100.0,
                "TL" => gs.leading = number(operands, 0),
                "Ts" => gs.rise = number(operands, 0),
                "Tf" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        let font = fonts
                            .entry(name.clone())
                            .or_insert_with(|| Arc::new(self.load_font(resources, name)))
                            .clone();
                        gs.font = Some(font);
                    }
                    gs.font_size = number(operands, 1);
                }
                "Td" | "TD" => {
                    let (tx, ty) = (number(operands, 0), number(operands, 1));
                    if op.operator == "TD" {
                        gs.leading = -ty;
                    }
                    tlm = Matrix::translate(tx, ty).then(&tlm);
                    tm = tlm;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                    tm = tlm;
                }
                "Tj" | "'" | "\"" | "TJ" => {
                    let mut items = Vec::new();
                    match op.operator.as_str() {
                        "TJ" => {
                            if let Some(Object::Array(elements)) = operands.first() {
                                for element in elements {
                                    match element {
                                        Object::String(bytes, _) => items.push(ShowItem::Bytes(bytes)),
                                        other => {
                                            if let Some(n) = as_number(other) {
                                                items.push(ShowItem::Adjust(n));
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        _ => {
                            if op.operator == "\"" {
                                gs.word_spacing = number(operands, 0);
                                gs.char_spacing = number(operands, 1);
                            }
                            if op.operator != "Tj" {
                                tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                                tm = tlm;
                            }
                            if let Some(Object::String(bytes, _)) = operands.last() {
                                items.push(ShowItem::Bytes(bytes));
                            }
                        }
                    }
                    let font = gs.font.clone().unwrap_or_default();
                    let glyphs = show_text(&gs, &font, &mut tm, &items);
                    effect = Effect::Text { font, glyphs };
                }

                "m" | "l" => {
                    extend_path(&mut path, &gs.ctm, operands.chunks(2).take(1));
                }
                "c" | "v" | "y" => {
                    extend_path(&mut path, &gs.ctm, operands.chunks(2));
                }
                "re" => {
                    let (x, y) = (number(operands, 0), number(operands, 1));
                    let (w, h) = (number(operands, 2), number(operands, 3));
                    let rect = gs.ctm.transform_rect(&BoundingBox::new(x, y, x + w, y + h));
                    path = Some(path.map_or(rect, |p| p.union(&rect)));
                }
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    if let Some(bbox) = path.take() {
                        let strokes = matches!(op.operator.as_str(), "S" | "s" | "B" | "B*" | "b" | "b*");
                        let fills = !matches!(op.operator.as_str(), "S" | "s");
                        let bbox = if strokes {
                            bbox.inflate(gs.line_width * gs.ctm.scale() / 2.0)
                        } else {
                            bbox
                        };
                        effect = Effect::Paint {
                            bbox,
                            fill: fills.then_some(gs.fill),
                            stroke: strokes.then_some(gs.stroke),
                        };
                    }
                }
                "n" => path = None,

                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        effect = self.xobject_effect(resources, name, &gs, depth, visit);
                    }
                }
                "BI" => {
                    effect = Effect::Image {
                        bbox: gs.ctm.transform_rect(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
                    };
                }
                _ => {}
            }

            visit(OpLocation { index, depth }, op, &effect);
        }
    }

    fn load_font(&self, resources: &Dictionary, name: &[u8]) -> FontInfo {
        match get_dict(self.doc, resources, b"Font").and_then(|fonts| get_dict(self.doc, fonts, name)) {
            Some(font) => FontInfo::load(self.doc, font),
            None => {
                tracing::debug!(
                    "Font /{} not found in resources, using Helvetica metrics",
                    String::from_utf8_lossy(name)
                );
                FontInfo::default()
            }
        }
    }

    fn xobject_effect(
        &self,
        resources: &Dictionary,
        name: &[u8],
        gs: &GraphicsState,
        depth: usize,
        visit: &mut dyn FnMut(OpLocation, &Operation, &Effect),
    ) -> Effect {
        let doc = self.doc;
        let Some(Object::Stream(stream)) = get_dict(doc, resources, b"XObject")
            .and_then(|xobjects| get(doc, xobjects, name))
        else {
            return Effect::None;
        };

        match get_name(doc, &stream.dict, b"Subtype") {
            Some(b"Image") => Effect::Image {
                bbox: gs.ctm.transform_rect(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            },
            Some(b"Form") => {
                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| number_array(doc, m))
                    .and_then(|m| Matrix::from_values(&m))
                    .unwrap_or(Matrix::IDENTITY);
                let form_space = matrix.then(&gs.ctm);
                let bbox = stream
                    .dict
                    .get(b"BBox")
                    .ok()
                    .and_then(|b| number_array(doc, b))
                    .and_then(|b| rect_from_array(&b))
                    .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0));

                if self.descend_forms && depth < MAX_FORM_DEPTH {
                    match stream_content(stream).and_then(|bytes| decode_operations(&bytes)) {
                        Ok(ops) => {
                            let form_resources =
                                get_dict(doc, &stream.dict, b"Resources").unwrap_or(resources);
                            self.run_at(&ops, form_resources, form_space, depth + 1, visit);
                        }
                        Err(e) => tracing::debug!("Skipping unreadable form XObject: {}", e),
                    }
                }
                Effect::Form {
                    bbox: form_space.transform_rect(&bbox),
                    name: name.to_vec(),
                    matrix: form_space,
                }
            }
            _ => Effect::None,
        }
    }
}

fn extend_path<'a>(
    path: &mut Option<BoundingBox>,
    ctm: &Matrix,
    points: impl Iterator<Item = &'a [Object]>,
) {
    for point in points {
        if let [x, y] = point {
            let (Some(x), Some(y)) = (as_number(x), as_number(y)) else {
                continue;
            };
            let (x, y) = ctm.apply(x, y);
            let p = BoundingBox::new(x, y, x, y);
            *path = Some(path.map_or(p, |bbox| bbox.union(&p)));
        }
    }
}

fn show_text(
    gs: &GraphicsState,
    font: &FontInfo,
    tm: &mut Matrix,
    items: &[ShowItem],
) -> Vec<PlacedGlyph> {
    let size = gs.font_size;
    let scale = gs.horizontal_scale;
    let ascent = font.ascent / 1000.0;
    let descent = font.descent / 1000.0;
    let mut glyphs = Vec::new();

    for item in items {
        match item {
            ShowItem::Adjust(n) => {
                *tm = Matrix::translate(-n / 1000.0 * size * scale, 0.0).then(tm);
            }
            ShowItem::Bytes(bytes) => {
                for code in font.codes(bytes) {
                    let w0 = font.advance(code);
                    let word_spacing = if font.is_word_space(code) {
                        gs.word_spacing
                    } else {
                        0.0
                    };
                    let trm = Matrix::new(size * scale, 0.0, 0.0, size, 0.0, gs.rise)
                        .then(tm)
                        .then(&gs.ctm);

                    let corners = [
                        trm.apply(0.0, ascent),
                        trm.apply(w0, ascent),
                        trm.apply(0.0, descent),
                        trm.apply(w0, descent),
                    ];
                    let advance = w0 * size + gs.char_spacing + word_spacing;
                    glyphs.push(PlacedGlyph {
                        code,
                        text: font.decode(code),
                        corners,
                        bbox: BoundingBox::from_points(&corners.map(|(x, y)| Point::new(x, y))),
                        origin: trm.apply(0.0, 0.0),
                        end: trm.apply(w0, 0.0),
                        size: (trm.c * trm.c + trm.d * trm.d).sqrt(),
                        removal_kern: (size != 0.0).then(|| -advance * 1000.0 / size),
                        fill: gs.fill,
                    });

                    *tm = Matrix::translate(advance * scale, 0.0).then(tm);
                }
            }
        }
    }
    glyphs
}

/// Builds a page's glyph event stream from text effects.
///
/// Line breaks are inferred from baseline jumps and a gap wider than a fifth
/// of the font size becomes a space. A large vertical jump ends the block.
pub struct TextCollector {
    space: PageSpace,
    /// `space` without its rotation, where baselines run along x.
    layout: PageSpace,
    events: Vec<GlyphEvent>,
    last: Option<LastGlyph>,
    open_block: bool,
}

struct LastGlyph {
    end: Point,
    baseline: f64,
    size: f64,
    blank: bool,
    quad: Quad,
}

impl TextCollector {
    pub fn new(space: PageSpace) -> Self {
        Self {
            space,
            layout: space.unrotated(),
            events: Vec::new(),
            last: None,
            open_block: false,
        }
    }

    pub fn visit(&mut self, effect: &Effect) {
        if let Effect::Text { glyphs, .. } = effect {
            for glyph in glyphs {
                self.push(glyph);
            }
        }
    }

    fn push(&mut self, glyph: &PlacedGlyph) {
        if glyph.text.is_empty() {
            return;
        }
        let origin = self.layout.to_page(glyph.origin.0, glyph.origin.1);
        let end = self.layout.to_page(glyph.end.0, glyph.end.1);
        let size = glyph.size.max(1.0);
        let blank = glyph.text.chars().all(char::is_whitespace);

        if let Some(last) = &self.last {
            let line_size = size.max(last.size);
            let drop = (origin.y - last.baseline).abs();
            if drop > 1.5 * line_size {
                self.events.push(GlyphEvent::EndBlock);
            } else if drop > 0.5 * line_size || origin.x < last.end.x - line_size {
                self.events.push(GlyphEvent::EndLine);
            } else if origin.x - last.end.x > 0.2 * line_size && !blank && !last.blank {
                let mut gap = last.quad;
                gap.0[0] = last.quad.0[2];
                gap.0[4] = last.quad.0[6];
                gap.0[2] = origin.x;
                gap.0[6] = origin.x;
                let quad = self.display(&gap);
                self.events.push(GlyphEvent::Char { c: ' ', quad });
            }
        }

        let corners = glyph.corners.map(|(x, y)| self.layout.to_page(x, y));
        let quad = Quad::from_corners(corners[0], corners[1], corners[2], corners[3]);
        let chars: Vec<char> = glyph.text.chars().collect();
        let n = chars.len() as f64;
        for (k, c) in chars.iter().enumerate() {
            let (t0, t1) = (k as f64 / n, (k + 1) as f64 / n);
            let c = if c.is_whitespace() { ' ' } else { *c };
            let quad = self.display(&slice_quad(&quad, t0, t1));
            self.events.push(GlyphEvent::Char { c, quad });
        }

        self.open_block = true;
        self.last = Some(LastGlyph {
            end,
            baseline: origin.y,
            size,
            blank,
            quad,
        });
    }

    /// Turn a layout quad into page space.
    fn display(&self, quad: &Quad) -> Quad {
        if self.space == self.layout {
            return *quad;
        }
        let [ul, ur, ll, lr] = quad.corners().map(|corner| {
            let (x, y) = self.layout.to_pdf(corner);
            self.space.to_page(x, y)
        });
        Quad::from_corners(ul, ur, ll, lr)
    }

    pub fn finish(mut self) -> Vec<GlyphEvent> {
        if self.open_block {
            self.events.push(GlyphEvent::EndBlock);
        }
        self.events
    }
}

fn lerp(a: Point, b: Point, t: f64) -> Point {
    Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}

/// Part of a glyph quad between fractions `t0` and `t1` of its advance.
fn slice_quad(quad: &Quad, t0: f64, t1: f64) -> Quad {
    if t0 == 0.0 && t1 == 1.0 {
        return *quad;
    }
    let [ul, ur, ll, lr] = quad.corners();
    Quad::from_corners(lerp(ul, ur, t0), lerp(ul, ur, t1), lerp(ll, lr, t0), lerp(ll, lr, t1))
}

/// Glyph events of a page, including text drawn inside form XObjects.
pub fn page_glyph_events(doc: &Document, page_id: ObjectId, space: PageSpace) -> Result<Vec<GlyphEvent>> {
    let ops = page_operations(doc, page_id)?;
    let resources = page_resources(doc, page_id);
    let mut collector = TextCollector::new(space);
    Interpreter::new(doc)
        .descend_into_forms()
        .run(&ops, &resources, &mut |_, _, effect| collector.visit(effect));
    Ok(collector.finish())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::words::segment_words;
    use lopdf::dictionary;

    /// Single-page document with the given content and a Helvetica /F1.
    pub(crate) fn page_with_content(content: &str) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    /// Saved bytes of [`page_with_content`].
    pub(crate) fn pdf_with_content(content: &str) -> Vec<u8> {
        let (mut doc, _) = page_with_content(content);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn events(content: &str) -> Vec<GlyphEvent> {
        let (doc, page_id) = page_with_content(content);
        let space = PageSpace::for_page(&doc, page_id).unwrap();
        page_glyph_events(&doc, page_id, space).unwrap()
    }

    fn text(events: &[GlyphEvent]) -> Vec<String> {
        segment_words(events).into_iter().map(|w| w.text).collect()
    }

    #[test]
    fn test_matrix_then_composes_left_to_right() {
        let scale = Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let shift = Matrix::translate(10.0, 5.0);
        assert_eq!(scale.then(&shift).apply(1.0, 1.0), (12.0, 7.0));
        assert_eq!(shift.then(&scale).apply(1.0, 1.0), (22.0, 12.0));
    }

    #[test]
    fn test_invert_undoes_matrix() {
        let m = Matrix::new(0.0, 2.0, -1.0, 0.0, 30.0, 40.0);
        let inverse = m.invert().unwrap();
        let (x, y) = m.apply(3.0, 7.0);
        let (bx, by) = inverse.apply(x, y);
        assert!((bx - 3.0).abs() < 1e-9 && (by - 7.0).abs() < 1e-9);
        assert!(Matrix::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0).invert().is_none());
    }

    #[test]
    fn test_glyph_positions_follow_font_widths() {
        let events = events("BT /F1 10 Tf 20 100 Td (Hi) Tj ET");
        let GlyphEvent::Char { c, quad } = &events[1] else {
            panic!("expected a glyph, got {:?}", events[1]);
        };
        assert_eq!(*c, 'i');
        // 'H' is 722 units wide; page space y is flipped
        let ul = quad.ul();
        assert!((ul.x - 27.22).abs() < 1e-6);
        assert!((ul.y - (200.0 - 107.18)).abs() < 1e-6);
        assert_eq!(events.last(), Some(&GlyphEvent::EndBlock));
    }

    #[test]
    fn test_tj_array_gap_becomes_space() {
        let events = events("BT /F1 10 Tf 20 100 Td [(Hi) -1000 (there)] TJ ET");
        assert_eq!(text(&events), vec!["Hi", "there"]);
    }

    #[test]
    fn test_new_line_is_detected() {
        let events = events("BT /F1 10 Tf 12 TL 20 100 Td (ab) Tj (cd) ' ET");
        assert!(events.contains(&GlyphEvent::EndLine));
        assert_eq!(text(&events), vec!["ab", "cd"]);
    }

    #[test]
    fn test_rotated_page_keeps_words_together() {
        let (mut doc, page_id) = page_with_content("BT /F1 10 Tf 20 100 Td (Hi there) Tj ET");
        let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut).unwrap();
        page.set("Rotate", Object::Integer(90));
        page.set("CropBox", vec![10.into(), 20.into(), 190.into(), 180.into()]);

        let space = PageSpace::for_page(&doc, page_id).unwrap();
        assert_eq!(space.bounds(), BoundingBox::new(0.0, 0.0, 160.0, 180.0));
        let words = segment_words(&page_glyph_events(&doc, page_id, space).unwrap());
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Hi", "there"]);

        // Text runs down the turned page; the baseline at PDF y 100 sits 80 from the left
        let hi = words[0].bbox;
        assert!((hi.y0 - 10.0).abs() < 1e-6);
        assert!((hi.y1 - 19.44).abs() < 1e-6);
        assert!(hi.x0 < 80.0 && hi.x1 > 80.0);
    }

    #[test]
    fn test_paths_and_images_report_boxes() {
        let (doc, _) = page_with_content("");
        let ops = decode_operations(b"q 2 0 0 2 0 0 cm 10 10 20 5 re f Q 5 5 m 15 25 l S").unwrap();
        let mut boxes = Vec::new();
        Interpreter::new(&doc).run(&ops, &Dictionary::new(), &mut |_, _, effect| {
            if let Effect::Paint { bbox, .. } = effect {
                boxes.push(*bbox);
            }
        });
        assert_eq!(boxes[0], BoundingBox::new(20.0, 20.0, 60.0, 30.0));
        assert_eq!(boxes[1], BoundingBox::new(4.5, 4.5, 15.5, 25.5));
    }

    #[test]
    fn test_removal_kern_matches_advance() {
        let (doc, _) = page_with_content("");
        let ops = decode_operations(b"BT /F1 10 Tf 1 Tc 2 Tw ( ) Tj ET").unwrap();
        let mut kerns = Vec::new();
        Interpreter::new(&doc).run(&ops, &Dictionary::new(), &mut |_, _, effect| {
            if let Effect::Text { glyphs, .. } = effect {
                kerns.extend(glyphs.iter().filter_map(|g| g.removal_kern));
            }
        });
        // (0.278 * 10 + 1 + 2) * 1000 / 10
        assert_eq!(kerns.len(), 1);
        assert!((kerns[0] + 578.0).abs() < 1e-9);
    }
}
