//! Page-space geometry for redactions
//!
//! All coordinates here are in *page space*: PDF points with the origin at the
//! top-left corner of the displayed page (CropBox, turned by `/Rotate`) and y
//! growing downward, which is the orientation an editor overlay draws in.
//! The document engine converts to and from PDF user space at its boundary.

use serde::{Deserialize, Serialize};

use crate::error::{RedactError, Result};
use crate::redaction::Redaction;
use crate::words::Word;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Four corners of a glyph or match, as 8 scalars:
/// upper-left, upper-right, lower-left, lower-right (x, y each).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quad(pub [f64; 8]);

impl Quad {
    pub fn from_corners(ul: Point, ur: Point, ll: Point, lr: Point) -> Self {
        Quad([ul.x, ul.y, ur.x, ur.y, ll.x, ll.y, lr.x, lr.y])
    }

    /// Build a quad from raw scalars. Anything but 8 finite values is rejected.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let arr: [f64; 8] = values.try_into().map_err(|_| {
            RedactError::InvalidRegion(format!(
                "Quad needs 8 scalars, got {}",
                values.len()
            ))
        })?;
        let quad = Quad(arr);
        if !quad.is_finite() {
            return Err(RedactError::InvalidRegion(
                "Quad has non-finite coordinates".into(),
            ));
        }
        Ok(quad)
    }

    /// Axis-aligned rectangle as a quad.
    pub fn from_rect(bbox: &BoundingBox) -> Self {
        Quad([
            bbox.x0, bbox.y0, bbox.x1, bbox.y0, bbox.x0, bbox.y1, bbox.x1, bbox.y1,
        ])
    }

    pub fn ul(&self) -> Point {
        Point::new(self.0[0], self.0[1])
    }

    pub fn ur(&self) -> Point {
        Point::new(self.0[2], self.0[3])
    }

    pub fn ll(&self) -> Point {
        Point::new(self.0[4], self.0[5])
    }

    pub fn lr(&self) -> Point {
        Point::new(self.0[6], self.0[7])
    }

    pub fn corners(&self) -> [Point; 4] {
        [self.ul(), self.ur(), self.ll(), self.lr()]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Keep this quad's upper-left corner and take the trailing corners of `next`.
    pub fn extend_to(&mut self, next: &Quad) {
        self.0[2..8].copy_from_slice(&next.0[2..8]);
    }

    pub fn envelope(&self) -> BoundingBox {
        BoundingBox::from_points(&self.corners())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn from_points(points: &[Point]) -> Self {
        let mut bbox = BoundingBox {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        };
        for p in points {
            bbox.x0 = bbox.x0.min(p.x);
            bbox.y0 = bbox.y0.min(p.y);
            bbox.x1 = bbox.x1.max(p.x);
            bbox.y1 = bbox.y1.max(p.y);
        }
        bbox
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite()
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x0 <= x1 && y0 <= y1 {
            Some(BoundingBox { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        self.intersection(other).map_or(0.0, |b| b.area())
    }

    /// True when the two boxes share a region of positive area.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.intersection_area(other) > 0.0
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1 <= self.x1 && other.y1 <= self.y1
    }

    /// Clamp into `bounds`. A box entirely outside collapses onto the nearest edge.
    pub fn clip_to(&self, bounds: &BoundingBox) -> BoundingBox {
        let x0 = self.x0.clamp(bounds.x0, bounds.x1);
        let y0 = self.y0.clamp(bounds.y0, bounds.y1);
        let x1 = self.x1.clamp(bounds.x0, bounds.x1);
        let y1 = self.y1.clamp(bounds.y0, bounds.y1);
        BoundingBox { x0, y0, x1, y1 }
    }

    pub fn inflate(&self, by: f64) -> BoundingBox {
        BoundingBox {
            x0: self.x0 - by,
            y0: self.y0 - by,
            x1: self.x1 + by,
            y1: self.y1 + by,
        }
    }
}

/// One rectangle of a (possibly multi-line) redaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RedactionPart {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RedactionPart {
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self {
            x: bbox.x0,
            y: bbox.y0,
            width: (bbox.x1 - bbox.x0).max(0.0),
            height: (bbox.y1 - bbox.y0).max(0.0),
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x0: self.x,
            y0: self.y,
            x1: self.x + self.width,
            y1: self.y + self.height,
        }
    }

    pub fn to_quad(&self) -> Quad {
        Quad::from_rect(&self.bbox())
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// An uncommitted drag gesture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HighlightInProgress {
    /// Rectangle dragged between two points.
    Freeform {
        page_index: u32,
        origin: Point,
        current: Point,
    },
    /// Selection over a page's word sequence, offsets inclusive and unordered.
    TextRange {
        page_index: u32,
        start: usize,
        end: usize,
    },
}

impl HighlightInProgress {
    pub fn page_index(&self) -> u32 {
        match self {
            HighlightInProgress::Freeform { page_index, .. } => *page_index,
            HighlightInProgress::TextRange { page_index, .. } => *page_index,
        }
    }
}

/// What the core knows about one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageData {
    pub bounds: BoundingBox,
    pub words: Vec<Word>,
    /// Rendered page image (PNG), when the caller asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
}

impl PageData {
    pub fn new(bounds: BoundingBox, words: Vec<Word>) -> Self {
        Self {
            bounds,
            words,
            image: None,
        }
    }

    /// Plain text of the page, words joined by single spaces.
    pub fn text(&self) -> String {
        join_words(self.words.iter())
    }
}

fn join_words<'a>(words: impl Iterator<Item = &'a Word>) -> String {
    words.map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ")
}

/// Union of all parts.
pub fn bounding_box(parts: &[RedactionPart]) -> Result<BoundingBox> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| RedactError::InvalidRegion("Redaction has no parts".into()))?;
    Ok(rest
        .iter()
        .fold(first.bbox(), |acc, part| acc.union(&part.bbox())))
}

/// Turn an in-progress gesture into the parts of a redaction.
pub fn finalize_highlight(
    page: &PageData,
    highlight: &HighlightInProgress,
) -> Result<Vec<RedactionPart>> {
    match highlight {
        HighlightInProgress::Freeform {
            origin, current, ..
        } => {
            if !origin.is_finite() || !current.is_finite() {
                return Err(RedactError::InvalidRegion(
                    "Highlight has non-finite coordinates".into(),
                ));
            }
            let rect = BoundingBox::new(origin.x, origin.y, current.x, current.y)
                .clip_to(&page.bounds);
            Ok(vec![RedactionPart::from_bbox(&rect)])
        }
        HighlightInProgress::TextRange { start, end, .. } => {
            let (lo, hi) = if start <= end {
                (*start, *end)
            } else {
                (*end, *start)
            };
            if hi >= page.words.len() {
                return Err(RedactError::InvalidRegion(format!(
                    "Word offset {} out of range (page has {} words)",
                    hi,
                    page.words.len()
                )));
            }
            Ok(line_parts(&page.words[lo..=hi]))
        }
    }
}

/// One part per visual line of `words`.
fn line_parts(words: &[Word]) -> Vec<RedactionPart> {
    let mut lines: Vec<BoundingBox> = Vec::new();
    for word in words {
        let center_y = (word.bbox.y0 + word.bbox.y1) / 2.0;
        match lines.last_mut() {
            Some(line) if center_y >= line.y0 && center_y <= line.y1 => {
                *line = line.union(&word.bbox);
            }
            _ => lines.push(word.bbox),
        }
    }
    lines.iter().map(RedactionPart::from_bbox).collect()
}

/// Text of every word on the page that a part of `redaction` overlaps.
pub fn get_redaction_text(redaction: &Redaction, page: &PageData) -> String {
    let boxes: Vec<BoundingBox> = redaction.parts.iter().map(|p| p.bbox()).collect();
    join_words(
        page.words
            .iter()
            .filter(|w| boxes.iter().any(|b| b.overlaps(&w.bbox))),
    )
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn part_strategy() -> impl Strategy<Value = RedactionPart> {
        (-1000.0f64..1000.0, -1000.0f64..1000.0, 0.0f64..500.0, 0.0f64..500.0).prop_map(
            |(x, y, width, height)| RedactionPart {
                x,
                y,
                width,
                height,
            },
        )
    }

    proptest! {
        /// Property: the union contains every input rectangle
        #[test]
        fn bounding_box_contains_all_parts(parts in prop::collection::vec(part_strategy(), 1..20)) {
            let bbox = bounding_box(&parts).unwrap();
            for part in &parts {
                prop_assert!(bbox.contains(&part.bbox()));
            }
        }

        /// Property: a freeform highlight never leaves the page
        #[test]
        fn freeform_stays_inside_bounds(
            x0 in -200.0f64..900.0,
            y0 in -200.0f64..900.0,
            x1 in -200.0f64..900.0,
            y1 in -200.0f64..900.0,
        ) {
            let bounds = BoundingBox::new(0.0, 0.0, 612.0, 792.0);
            let page = PageData::new(bounds, vec![]);
            let highlight = HighlightInProgress::Freeform {
                page_index: 0,
                origin: Point::new(x0, y0),
                current: Point::new(x1, y1),
            };
            let parts = finalize_highlight(&page, &highlight).unwrap();
            prop_assert_eq!(parts.len(), 1);
            prop_assert!(parts[0].is_valid());
            prop_assert!(bounds.contains(&parts[0].bbox()));
        }

        /// Property: redaction text lists exactly the overlapping words, in page order
        #[test]
        fn redaction_text_lists_overlapping_words_in_order(
            boxes in prop::collection::vec((0.0f64..500.0, 0.0f64..700.0, 1.0f64..80.0, 1.0f64..20.0), 0..30),
            region in (0.0f64..500.0, 0.0f64..700.0, 1.0f64..200.0, 1.0f64..200.0),
        ) {
            let words: Vec<Word> = boxes
                .iter()
                .enumerate()
                .map(|(i, (x, y, w, h))| Word {
                    text: format!("w{}", i),
                    bbox: BoundingBox::new(*x, *y, x + w, y + h),
                })
                .collect();
            let page = PageData::new(BoundingBox::new(0.0, 0.0, 612.0, 792.0), words);
            let (x, y, w, h) = region;
            let redaction = crate::redaction::result_to_redaction(
                &[Quad::from_rect(&BoundingBox::new(x, y, x + w, y + h))],
                0,
                crate::redaction::RedactionMetadata::default(),
            )
            .unwrap();
            let covered = redaction.parts[0].bbox();

            let expected: Vec<&str> = page
                .words
                .iter()
                .filter(|word| covered.intersection_area(&word.bbox) > 0.0)
                .map(|word| word.text.as_str())
                .collect();
            let text = get_redaction_text(&redaction, &page);
            let got: Vec<&str> = text.split_whitespace().collect();
            prop_assert_eq!(got, expected);
        }
    }
}
