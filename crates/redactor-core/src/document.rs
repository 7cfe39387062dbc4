//! Document engine
//!
//! [`DocumentEngine`] is everything the redaction core needs from a PDF
//! library: page geometry, the glyph stream, previews and the primitives the
//! pipeline drives. [`PdfDocument`] implements it on top of lopdf.
//!
//! All coordinates crossing this boundary are in page space (the page as a
//! viewer shows it after CropBox and `/Rotate`, origin at the top-left, y
//! growing downwards).

use std::collections::BTreeMap;

use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};

use crate::annotations::{
    add_annotation_to_page, placeholder_annotation, redact_annotation, remove_annotations,
    remove_annotations_under, take_annotations,
};
use crate::bake::{bake_page, drop_acroform};
use crate::content::page_glyph_events;
use crate::error::{RedactError, Result};
use crate::geometry::{BoundingBox, PageData, Quad};
use crate::preview::render_layout;
use crate::redaction::{ImportedAnnotation, RedactionAnnotation};
use crate::resources::PageSpace;
use crate::scrub::{scrub_page, RemovalStats};
use crate::words::{search_glyphs, segment_words, GlyphEvent, Word};

/// How applied regions are labelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderStyle {
    pub font_size: f64,
    /// Used when a redaction carries no content text.
    pub default_label: String,
}

impl Default for PlaceholderStyle {
    fn default() -> Self {
        Self {
            font_size: 8.0,
            default_label: "REDACTED".to_string(),
        }
    }
}

/// Result of applying the staged markers of one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Mark-only markers left in place.
    pub kept: usize,
    pub removed: RemovalStats,
}

pub trait DocumentEngine: Send {
    /// Engine with `bytes` already loaded.
    fn open(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;

    /// Replace the loaded document. Anything staged is forgotten.
    fn load_document(&mut self, bytes: &[u8]) -> Result<()>;

    fn page_count(&self) -> Result<u32>;

    fn page_bounds(&self, page_index: u32) -> Result<BoundingBox>;

    fn page_glyph_stream(&self, page_index: u32) -> Result<Vec<GlyphEvent>>;

    /// PNG preview at `scale` pixels per point.
    fn render_page_image(&self, page_index: u32, scale: f64) -> Result<Vec<u8>>;

    /// Quads of every occurrence of `needle` on a page, one list per hit.
    fn search(&self, page_index: u32, needle: &str) -> Result<Vec<Vec<Quad>>> {
        Ok(search_glyphs(&self.page_glyph_stream(page_index)?, needle))
    }

    /// Add redaction markers to a page without touching its content.
    fn stage_redactions(&mut self, page_index: u32, marks: &[RedactionAnnotation]) -> Result<usize>;

    /// Remove content under the staged markers flagged for application.
    fn apply_staged(&mut self, page_index: u32, style: &PlaceholderStyle) -> Result<ApplyOutcome>;

    /// Flatten all annotations into page content and drop the form layer.
    fn bake_document(&mut self, style: &PlaceholderStyle) -> Result<()>;

    fn serialize(&mut self) -> Result<Vec<u8>>;

    /// Read the redaction markers the document arrived with and strip them.
    fn import_annotations(&mut self) -> Result<Vec<ImportedAnnotation>>;

    fn page_words(&self, page_index: u32) -> Result<Vec<Word>> {
        Ok(segment_words(&self.page_glyph_stream(page_index)?))
    }

    fn page_data(&self, page_index: u32, render_scale: Option<f64>) -> Result<PageData> {
        let mut data = PageData::new(self.page_bounds(page_index)?, self.page_words(page_index)?);
        if let Some(scale) = render_scale {
            data.image = Some(self.render_page_image(page_index, scale)?);
        }
        Ok(data)
    }
}

/// lopdf-backed engine.
#[derive(Default)]
pub struct PdfDocument {
    doc: Option<Document>,
    staged: BTreeMap<u32, Vec<(ObjectId, RedactionAnnotation)>>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.doc.is_some()
    }

    fn document(&self) -> Result<&Document> {
        self.doc.as_ref().ok_or(RedactError::DocumentNotLoaded)
    }

    fn document_mut(&mut self) -> Result<&mut Document> {
        self.doc.as_mut().ok_or(RedactError::DocumentNotLoaded)
    }

    fn page_id(&self, page_index: u32) -> Result<ObjectId> {
        let pages = self.document()?.get_pages();
        page_index
            .checked_add(1)
            .and_then(|number| pages.get(&number).copied())
            .ok_or_else(|| {
                RedactError::InvalidRegion(format!(
                    "Page {} out of range (document has {} pages)",
                    page_index,
                    pages.len()
                ))
            })
    }

    fn page(&self, page_index: u32) -> Result<(ObjectId, PageSpace)> {
        let page_id = self.page_id(page_index)?;
        Ok((page_id, PageSpace::for_page(self.document()?, page_id)?))
    }

    /// Number of markers staged and not yet applied or baked.
    pub fn staged_count(&self) -> usize {
        self.staged.values().map(Vec::len).sum()
    }
}

impl DocumentEngine for PdfDocument {
    fn open(bytes: &[u8]) -> Result<Self> {
        let mut engine = Self::new();
        engine.load_document(bytes)?;
        Ok(engine)
    }

    fn load_document(&mut self, bytes: &[u8]) -> Result<()> {
        let doc = Document::load_mem(bytes).map_err(|e| RedactError::ParseError(e.to_string()))?;
        tracing::debug!("Loaded document with {} pages", doc.get_pages().len());
        self.doc = Some(doc);
        self.staged.clear();
        Ok(())
    }

    fn page_count(&self) -> Result<u32> {
        Ok(self.document()?.get_pages().len() as u32)
    }

    fn page_bounds(&self, page_index: u32) -> Result<BoundingBox> {
        Ok(self.page(page_index)?.1.bounds())
    }

    fn page_glyph_stream(&self, page_index: u32) -> Result<Vec<GlyphEvent>> {
        let (page_id, space) = self.page(page_index)?;
        page_glyph_events(self.document()?, page_id, space)
    }

    fn render_page_image(&self, page_index: u32, scale: f64) -> Result<Vec<u8>> {
        let page_id = self.page_id(page_index)?;
        render_layout(self.document()?, page_id, scale)
    }

    fn stage_redactions(&mut self, page_index: u32, marks: &[RedactionAnnotation]) -> Result<usize> {
        let (page_id, space) = self.page(page_index)?;
        if let Some(stray) = marks.iter().find(|m| m.page_index != page_index) {
            return Err(RedactError::InvalidRegion(format!(
                "Marker for page {} staged on page {}",
                stray.page_index, page_index
            )));
        }

        let doc = self.document_mut()?;
        let mut staged = Vec::with_capacity(marks.len());
        for mark in marks {
            let annot_id = doc.add_object(redact_annotation(mark, &space));
            add_annotation_to_page(doc, page_id, annot_id)?;
            staged.push((annot_id, mark.clone()));
        }

        tracing::debug!("Staged {} markers on page {}", staged.len(), page_index);
        let count = staged.len();
        self.staged.entry(page_index).or_default().extend(staged);
        Ok(count)
    }

    fn apply_staged(&mut self, page_index: u32, style: &PlaceholderStyle) -> Result<ApplyOutcome> {
        let (page_id, space) = self.page(page_index)?;
        let staged = self.staged.remove(&page_index).unwrap_or_default();
        let (to_apply, kept): (Vec<_>, Vec<_>) = staged.into_iter().partition(|(_, m)| m.apply);

        let mut outcome = ApplyOutcome {
            kept: kept.len(),
            ..ApplyOutcome::default()
        };
        if !kept.is_empty() {
            self.staged.insert(page_index, kept);
        }
        if to_apply.is_empty() {
            return Ok(outcome);
        }

        let regions: Vec<BoundingBox> = to_apply
            .iter()
            .flat_map(|(_, mark)| mark.quads.iter())
            .map(|quad| space.rect_to_pdf(&quad.envelope()))
            .collect();

        let doc = self.document_mut()?;
        outcome.removed = scrub_page(doc, page_id, &regions)?;
        // Appearances of annotations under a region would be baked back on top
        outcome.removed.annotations = remove_annotations_under(doc, page_id, &regions)?;

        for (_, mark) in &to_apply {
            let label = if mark.content.is_empty() {
                style.default_label.as_str()
            } else {
                mark.content.as_str()
            };
            let placeholder =
                placeholder_annotation(&space.rect_to_pdf(&mark.rect), label, style.font_size);
            let placeholder_id = doc.add_object(placeholder);
            add_annotation_to_page(doc, page_id, placeholder_id)?;
        }
        let applied_ids: Vec<ObjectId> = to_apply.iter().map(|(id, _)| *id).collect();
        remove_annotations(doc, page_id, &applied_ids)?;

        outcome.applied = to_apply.len();
        tracing::debug!(
            "Applied {} markers on page {} ({} kept)",
            outcome.applied,
            page_index,
            outcome.kept
        );
        Ok(outcome)
    }

    fn bake_document(&mut self, style: &PlaceholderStyle) -> Result<()> {
        let doc = self.document_mut()?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let mut flattened = 0;
        for page_id in page_ids {
            flattened += bake_page(doc, page_id, style.font_size)?.flattened;
        }
        drop_acroform(doc)?;
        self.staged.clear();
        tracing::debug!("Baked {} annotations", flattened);
        Ok(())
    }

    fn serialize(&mut self) -> Result<Vec<u8>> {
        let doc = self.document_mut()?;
        doc.prune_objects();
        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| RedactError::SerializationError(e.to_string()))?;
        Ok(out)
    }

    fn import_annotations(&mut self) -> Result<Vec<ImportedAnnotation>> {
        let pages: Vec<(u32, ObjectId)> = self
            .document()?
            .get_pages()
            .into_iter()
            .map(|(number, id)| (number - 1, id))
            .collect();

        let mut imported = Vec::new();
        for (page_index, page_id) in pages {
            let space = PageSpace::for_page(self.document()?, page_id)?;
            let doc = self.document_mut()?;
            for annot in take_annotations(doc, page_id, b"Redact")? {
                let mut quads: Vec<Quad> = annot
                    .quad_points(doc)
                    .iter()
                    .map(|values| space.quad_to_page(values))
                    .collect();
                if quads.is_empty() {
                    if let Some(rect) = annot.rect(doc) {
                        quads.push(Quad::from_rect(&space.rect_to_page(&rect)));
                    }
                }
                imported.push(ImportedAnnotation {
                    page_index,
                    quads,
                    content: annot.contents(doc),
                });
            }
        }

        if !imported.is_empty() {
            tracing::info!("Imported {} redaction markers", imported.len());
        }
        Ok(imported)
    }
}
