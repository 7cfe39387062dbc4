//! PDF redaction geometry and application
//!
//! This crate turns glyph positions into words, user gestures and machine
//! suggestions into page-space redaction regions, and commits accepted
//! regions into a PDF so the covered content is gone for good.
//!
//! Layers, bottom up:
//! - `words` / `geometry` / `redaction` / `session`: pure data transforms
//! - `document` and its helpers (`content`, `fonts`, `resources`, `scrub`,
//!   `annotations`, `bake`, `preview`): the lopdf engine
//! - `pipeline`: the stage / apply / bake / export state machine
//! - `command` / `worker`: request protocol and the threaded host

pub mod annotations;
pub mod bake;
pub mod command;
pub mod content;
pub mod document;
pub mod error;
pub mod fonts;
pub mod geometry;
pub mod pipeline;
pub mod preview;
pub mod redaction;
pub mod resources;
pub mod scrub;
pub mod session;
pub mod words;
#[cfg(feature = "worker")]
pub mod worker;

pub use command::{DocumentRequest, DocumentResponse, DocumentService, ProcessMetrics};
pub use document::{ApplyOutcome, DocumentEngine, PdfDocument, PlaceholderStyle};
pub use error::{RedactError, Result};
pub use geometry::{
    bounding_box, finalize_highlight, get_redaction_text, BoundingBox, HighlightInProgress,
    PageData, Point, Quad, RedactionPart,
};
pub use pipeline::{
    redact_document, run_pipeline, PipelineOptions, PipelineOutput, PipelineReport,
    PipelineState, RedactionPipeline,
};
pub use redaction::{
    annotations_to_redactions, quad_to_part, redactions_to_annotations, result_to_redaction,
    ExportMode, ImportedAnnotation, Redaction, RedactionAnnotation, RedactionId,
    RedactionMetadata, RedactionRule,
};
pub use scrub::RemovalStats;
pub use session::{IngestReport, RedactionUpdate, SessionState, SuggestionInput};
pub use words::{search_glyphs, segment_words, GlyphEvent, Word};
#[cfg(feature = "worker")]
pub use worker::DocumentHandle;

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<u32> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| RedactError::ParseError(e.to_string()))?;
    Ok(doc.get_pages().len() as u32)
}

/// Parse a 1-based page list like "1-3, 5" into sorted unique 0-based page
/// indices, for restricting work to part of a document.
pub fn parse_ranges(input: &str) -> Result<Vec<u32>> {
    use std::collections::BTreeSet;

    let page = |text: &str| -> Result<u32> {
        match text.trim().parse::<u32>() {
            Ok(0) => Err(RedactError::InvalidRange("Pages are numbered from 1".to_string())),
            Ok(n) => Ok(n - 1),
            Err(_) => Err(RedactError::InvalidRange(format!("Invalid page: {}", text.trim()))),
        }
    };

    let mut pages = BTreeSet::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(RedactError::InvalidRange(format!(
                    "Start {} > end {}",
                    start + 1,
                    end + 1
                )));
            }
            pages.extend(start..=end);
        } else {
            pages.insert(page(part)?);
        }
    }

    Ok(pages.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_single() {
        assert_eq!(parse_ranges("5").unwrap(), vec![4]);
    }

    #[test]
    fn test_parse_ranges_complex() {
        assert_eq!(parse_ranges("1-3, 5, 8-10").unwrap(), vec![0, 1, 2, 4, 7, 8, 9]);
    }

    #[test]
    fn test_parse_ranges_deduplicates() {
        assert_eq!(parse_ranges("1-3, 2-4").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_ranges_rejects_bad_input() {
        assert!(matches!(parse_ranges("0"), Err(RedactError::InvalidRange(_))));
        assert!(matches!(parse_ranges("3-1"), Err(RedactError::InvalidRange(_))));
        assert!(matches!(parse_ranges("x"), Err(RedactError::InvalidRange(_))));
        assert!(parse_ranges("").unwrap().is_empty());
    }

    #[test]
    fn test_page_count_of_generated_document() {
        let bytes = content::tests::pdf_with_content("");
        assert_eq!(get_page_count(&bytes).unwrap(), 1);
        assert!(matches!(get_page_count(b"nope"), Err(RedactError::ParseError(_))));
    }
}
