//! Word segmentation and text search over a page's glyph stream
//!
//! The document engine reports every glyph with its quad, plus explicit
//! line and block boundaries. Words are runs of non-space glyphs on one line.

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Quad};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub text: String,
    pub bbox: BoundingBox,
}

/// One event of a page's text layout, in content order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlyphEvent {
    Char { c: char, quad: Quad },
    EndLine,
    EndBlock,
}

#[derive(Default)]
struct WordBuffer {
    text: String,
    quad: Option<Quad>,
}

impl WordBuffer {
    fn push(&mut self, c: char, quad: &Quad) {
        match &mut self.quad {
            Some(running) => running.extend_to(quad),
            None => self.quad = Some(*quad),
        }
        self.text.push(c);
    }

    fn flush(&mut self, words: &mut Vec<Word>) {
        let text = std::mem::take(&mut self.text);
        if let Some(quad) = self.quad.take() {
            if !text.is_empty() {
                words.push(Word {
                    text,
                    bbox: quad.envelope(),
                });
            }
        }
    }
}

/// Merge glyphs into words in reading order.
pub fn segment_words<'a, I>(events: I) -> Vec<Word>
where
    I: IntoIterator<Item = &'a GlyphEvent>,
{
    let mut words = Vec::new();
    let mut buffer = WordBuffer::default();

    for event in events {
        match event {
            GlyphEvent::Char { c: ' ', .. } => buffer.flush(&mut words),
            GlyphEvent::Char { c, quad } => buffer.push(*c, quad),
            GlyphEvent::EndLine | GlyphEvent::EndBlock => buffer.flush(&mut words),
        }
    }
    // A stream that ends without a boundary still owns its last word.
    buffer.flush(&mut words);

    words
}

struct SearchChar {
    c: char,
    /// `None` for line and block breaks.
    quad: Option<Quad>,
}

/// Flatten the glyph stream into lowercase chars with single spaces between words.
fn search_text(events: &[GlyphEvent]) -> Vec<SearchChar> {
    let mut chars: Vec<SearchChar> = Vec::new();
    let mut pending_break = false;

    for event in events {
        match event {
            GlyphEvent::Char { c, quad } if !c.is_whitespace() => {
                if pending_break && !chars.is_empty() {
                    chars.push(SearchChar { c: ' ', quad: None });
                }
                pending_break = false;
                chars.push(SearchChar {
                    c: fold_case(*c),
                    quad: Some(*quad),
                });
            }
            GlyphEvent::Char { .. } | GlyphEvent::EndLine | GlyphEvent::EndBlock => {
                pending_break = true;
            }
        }
    }
    chars
}

fn fold_case(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn normalize_needle(needle: &str) -> Vec<char> {
    needle
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .map(fold_case)
        .collect()
}

/// Find every occurrence of `needle` on the page.
///
/// Matching ignores case and treats any run of whitespace or a line break as a
/// single space. Each hit yields one quad per line it touches.
pub fn search_glyphs(events: &[GlyphEvent], needle: &str) -> Vec<Vec<Quad>> {
    let needle = normalize_needle(needle);
    if needle.is_empty() {
        return Vec::new();
    }
    let haystack = search_text(events);

    let mut hits = Vec::new();
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        let matched = haystack[i..i + needle.len()]
            .iter()
            .zip(&needle)
            .all(|(h, n)| h.c == *n);
        if matched {
            hits.push(hit_quads(&haystack[i..i + needle.len()]));
            i += needle.len();
        } else {
            i += 1;
        }
    }
    hits
}

/// Group a hit's glyphs into per-line quads.
fn hit_quads(chars: &[SearchChar]) -> Vec<Quad> {
    let mut quads: Vec<Quad> = Vec::new();
    let mut running: Option<Quad> = None;

    for ch in chars {
        match (&ch.quad, &mut running) {
            (Some(q), Some(r)) => r.extend_to(q),
            (Some(q), None) => running = Some(*q),
            (None, _) => quads.extend(running.take()),
        }
    }
    quads.extend(running);
    quads
}
