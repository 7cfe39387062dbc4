//! Redaction model and conversion to native annotation records
//!
//! A [`Redaction`] is what the operator edits. A [`RedactionAnnotation`] is the
//! reduced record the document engine consumes when committing. The conversion
//! is one-way: rule metadata collapses into a plain content string.

use serde::{Deserialize, Serialize};

use crate::error::{RedactError, Result};
use crate::geometry::{bounding_box, BoundingBox, Quad, RedactionPart};

pub type RedactionId = String;

/// Fresh process-unique redaction id.
pub fn new_redaction_id() -> RedactionId {
    uuid::Uuid::new_v4().to_string()
}

/// Classification entry an operator can attach to a redaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionRule {
    pub group: String,
    pub title: String,
    pub reference: String,
    pub reason: String,
    pub full_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Redaction {
    pub id: RedactionId,
    pub page_index: u32,
    pub parts: Vec<RedactionPart>,
    /// `None` means apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_apply: Option<bool>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub is_indeterminate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RedactionRule>,
}

impl Redaction {
    /// Human-drawn redaction from finished parts.
    pub fn new(page_index: u32, parts: Vec<RedactionPart>) -> Result<Self> {
        validate_parts(&parts)?;
        Ok(Self {
            id: new_redaction_id(),
            page_index,
            parts,
            should_apply: Some(true),
            is_auto_generated: false,
            is_indeterminate: false,
            reason: None,
            rule: None,
        })
    }

    pub fn applies(&self) -> bool {
        self.should_apply.unwrap_or(true)
    }

    /// Accepted for export: decided by a person and not switched off.
    pub fn is_accepted(&self) -> bool {
        !self.is_indeterminate && self.applies()
    }

    pub fn bbox(&self) -> Result<BoundingBox> {
        bounding_box(&self.parts)
    }

    /// Text stored in the native record.
    pub fn content(&self) -> String {
        self.reason
            .clone()
            .or_else(|| self.rule.as_ref().map(|r| r.title.clone()))
            .unwrap_or_default()
    }
}

pub(crate) fn validate_parts(parts: &[RedactionPart]) -> Result<()> {
    if parts.is_empty() {
        return Err(RedactError::InvalidRegion("Redaction has no parts".into()));
    }
    if let Some(bad) = parts.iter().find(|p| !p.is_valid()) {
        return Err(RedactError::InvalidRegion(format!(
            "Invalid redaction part {:?}",
            bad
        )));
    }
    Ok(())
}

/// Optional fields for [`result_to_redaction`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RedactionMetadata {
    #[serde(default)]
    pub should_apply: Option<bool>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default)]
    pub is_indeterminate: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub rule: Option<RedactionRule>,
}

impl RedactionMetadata {
    /// Metadata for a machine suggestion awaiting review.
    pub fn suggestion(reason: Option<String>) -> Self {
        Self {
            is_auto_generated: true,
            is_indeterminate: true,
            reason,
            ..Self::default()
        }
    }
}

/// Axis-aligned envelope of a quad.
pub fn quad_to_part(quad: &Quad) -> RedactionPart {
    RedactionPart::from_bbox(&quad.envelope())
}

/// Build a redaction from search or suggestion quads on one page.
pub fn result_to_redaction(
    quads: &[Quad],
    page_index: u32,
    metadata: RedactionMetadata,
) -> Result<Redaction> {
    if let Some(bad) = quads.iter().find(|q| !q.is_finite()) {
        return Err(RedactError::InvalidRegion(format!(
            "Quad has non-finite coordinates: {:?}",
            bad.0
        )));
    }
    let parts: Vec<RedactionPart> = quads.iter().map(quad_to_part).collect();
    validate_parts(&parts)?;

    Ok(Redaction {
        id: new_redaction_id(),
        page_index,
        parts,
        should_apply: Some(metadata.should_apply.unwrap_or(true)),
        is_auto_generated: metadata.is_auto_generated,
        is_indeterminate: metadata.is_indeterminate,
        reason: metadata.reason,
        rule: metadata.rule,
    })
}

/// Which redactions make it into an export.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Every decided redaction; switched-off ones become mark-only records.
    #[default]
    All,
    /// Only redactions that remove content.
    ApplyOnly,
}

/// Native record handed to the document engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionAnnotation {
    pub page_index: u32,
    pub quads: Vec<Quad>,
    pub content: String,
    pub rect: BoundingBox,
    /// `false`: record the region but leave the content in place.
    pub apply: bool,
}

/// Convert decided redactions into annotation records.
pub fn redactions_to_annotations(
    redactions: &[Redaction],
    page_count: u32,
    mode: ExportMode,
) -> Result<Vec<RedactionAnnotation>> {
    let mut annotations = Vec::new();

    for redaction in redactions.iter().filter(|r| !r.is_indeterminate) {
        let apply = redaction.applies();
        if !apply && mode == ExportMode::ApplyOnly {
            continue;
        }
        if redaction.page_index >= page_count {
            return Err(RedactError::InvalidRegion(format!(
                "Redaction {} is on page {} but the document has {} pages",
                redaction.id, redaction.page_index, page_count
            )));
        }
        validate_parts(&redaction.parts)?;

        annotations.push(RedactionAnnotation {
            page_index: redaction.page_index,
            quads: redaction.parts.iter().map(RedactionPart::to_quad).collect(),
            content: redaction.content(),
            rect: redaction.bbox()?,
            apply,
        });
    }

    Ok(annotations)
}

/// A redaction marker found in a document on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedAnnotation {
    pub page_index: u32,
    pub quads: Vec<Quad>,
    pub content: String,
}

/// Turn imported markers into editable redactions. Markers without usable
/// quads are dropped; the second value is how many.
pub fn annotations_to_redactions(imported: &[ImportedAnnotation]) -> (Vec<Redaction>, usize) {
    let mut skipped = 0;
    let redactions = imported
        .iter()
        .filter_map(|annot| {
            let metadata = RedactionMetadata {
                reason: (!annot.content.is_empty()).then(|| annot.content.clone()),
                ..RedactionMetadata::default()
            };
            match result_to_redaction(&annot.quads, annot.page_index, metadata) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::debug!("Dropping imported marker on page {}: {}", annot.page_index, e);
                    skipped += 1;
                    None
                }
            }
        })
        .collect();
    (redactions, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(x0: f64, y0: f64, x1: f64, y1: f64) -> Quad {
        Quad::from_rect(&BoundingBox::new(x0, y0, x1, y1))
    }

    fn redaction(page_index: u32) -> Redaction {
        result_to_redaction(
            &[quad(10.0, 10.0, 50.0, 20.0), quad(10.0, 22.0, 30.0, 32.0)],
            page_index,
            RedactionMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_quad_to_part_uses_envelope() {
        // Slanted quad
        let q = Quad([10.0, 5.0, 30.0, 0.0, 12.0, 15.0, 32.0, 10.0]);
        assert_eq!(
            quad_to_part(&q),
            RedactionPart {
                x: 10.0,
                y: 0.0,
                width: 22.0,
                height: 15.0
            }
        );
    }

    #[test]
    fn test_result_to_redaction_assigns_unique_ids() {
        let a = redaction(0);
        let b = redaction(0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.should_apply, Some(true));
        assert_eq!(a.parts.len(), 2);
    }

    #[test]
    fn test_result_to_redaction_respects_metadata() {
        let r = result_to_redaction(
            &[quad(0.0, 0.0, 1.0, 1.0)],
            3,
            RedactionMetadata {
                should_apply: Some(false),
                reason: Some("salary".into()),
                ..RedactionMetadata::default()
            },
        )
        .unwrap();
        assert_eq!(r.page_index, 3);
        assert!(!r.applies());
        assert_eq!(r.content(), "salary");
    }

    #[test]
    fn test_result_to_redaction_without_quads_fails() {
        assert!(result_to_redaction(&[], 0, RedactionMetadata::default()).is_err());
    }

    #[test]
    fn test_indeterminate_redactions_are_never_exported() {
        let mut r = redaction(0);
        r.is_indeterminate = true;
        r.should_apply = Some(true);
        for mode in [ExportMode::All, ExportMode::ApplyOnly] {
            let annots = redactions_to_annotations(&[r.clone()], 1, mode).unwrap();
            assert!(annots.is_empty());
        }
    }

    #[test]
    fn test_switched_off_redaction_is_mark_only() {
        let mut r = redaction(0);
        r.should_apply = Some(false);
        let annots = redactions_to_annotations(&[r.clone()], 1, ExportMode::All).unwrap();
        assert_eq!(annots.len(), 1);
        assert!(!annots[0].apply);

        let annots = redactions_to_annotations(&[r], 1, ExportMode::ApplyOnly).unwrap();
        assert!(annots.is_empty());
    }

    #[test]
    fn test_annotation_rect_is_union_of_parts() {
        let annots = redactions_to_annotations(&[redaction(0)], 1, ExportMode::All).unwrap();
        assert_eq!(annots[0].rect, BoundingBox::new(10.0, 10.0, 50.0, 32.0));
        assert_eq!(annots[0].quads.len(), 2);
        assert_eq!(annots[0].content, "");
        assert!(annots[0].apply);
    }

    #[test]
    fn test_page_out_of_range_is_invalid_region() {
        let err = redactions_to_annotations(&[redaction(4)], 2, ExportMode::All).unwrap_err();
        assert!(matches!(err, RedactError::InvalidRegion(_)));
    }

    #[test]
    fn test_content_falls_back_to_rule_title() {
        let mut r = redaction(0);
        r.rule = Some(RedactionRule {
            group: "Personal Data".into(),
            title: "Name".into(),
            reference: "GDPR Art. 4(1)".into(),
            reason: "Personal identification information".into(),
            full_text: String::new(),
            url: None,
        });
        assert_eq!(r.content(), "Name");
    }

    #[test]
    fn test_imported_markers_become_redactions() {
        let imported = vec![
            ImportedAnnotation {
                page_index: 1,
                quads: vec![quad(0.0, 0.0, 5.0, 5.0)],
                content: "IBAN".into(),
            },
            ImportedAnnotation {
                page_index: 0,
                quads: vec![],
                content: String::new(),
            },
        ];
        let (redactions, skipped) = annotations_to_redactions(&imported);
        assert_eq!(redactions.len(), 1);
        assert_eq!(skipped, 1);
        assert_eq!(redactions[0].reason.as_deref(), Some("IBAN"));
        assert!(!redactions[0].is_indeterminate);
    }

    #[test]
    fn test_redaction_json_uses_camel_case() {
        let json = serde_json::to_string(&redaction(0)).unwrap();
        assert!(json.contains("\"pageIndex\":0"));
        assert!(json.contains("\"shouldApply\":true"));
    }
}
