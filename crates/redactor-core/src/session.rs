//! Editing session state
//!
//! Everything an editor needs between gestures lives in one plain value that
//! the caller owns: the redaction list, the selection and the in-progress
//! highlight. Nothing here is global, so any number of sessions can coexist.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{RedactError, Result};
use crate::geometry::{
    finalize_highlight, get_redaction_text, HighlightInProgress, PageData, Point, Quad,
    RedactionPart,
};
use crate::redaction::{
    result_to_redaction, validate_parts, Redaction, RedactionId, RedactionMetadata, RedactionRule,
};

/// Partial update applied by [`SessionState::update_redaction`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RedactionUpdate {
    #[serde(default)]
    pub should_apply: Option<bool>,
    #[serde(default)]
    pub is_indeterminate: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    /// `Some(None)` clears the rule.
    #[serde(default)]
    pub rule: Option<Option<RedactionRule>>,
    #[serde(default)]
    pub parts: Option<Vec<RedactionPart>>,
}

/// Candidate redaction from an external classifier, as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuggestionInput {
    #[serde(default)]
    pub id: Option<String>,
    pub page_index: u32,
    /// Raw quads; each must hold exactly 8 numbers.
    #[serde(default)]
    pub quads: Vec<Vec<f64>>,
    #[serde(default)]
    pub parts: Vec<RedactionPart>,
    #[serde(default)]
    pub should_apply: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub rule: Option<RedactionRule>,
}

/// Outcome of [`SessionState::ingest_suggestions`].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    redactions: Vec<Redaction>,
    selected: Option<RedactionId>,
    highlight: Option<HighlightInProgress>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redactions(redactions: Vec<Redaction>) -> Self {
        Self {
            redactions,
            ..Self::default()
        }
    }

    pub fn redactions(&self) -> &[Redaction] {
        &self.redactions
    }

    pub fn get(&self, id: &str) -> Option<&Redaction> {
        self.redactions.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.redactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redactions.is_empty()
    }

    /// Drop everything, e.g. when a new document is loaded.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add_redaction(&mut self, redaction: Redaction) -> Result<RedactionId> {
        validate_parts(&redaction.parts)?;
        if self.get(&redaction.id).is_some() {
            return Err(RedactError::InvalidRegion(format!(
                "Duplicate redaction id {}",
                redaction.id
            )));
        }
        let id = redaction.id.clone();
        self.redactions.push(redaction);
        Ok(id)
    }

    pub fn remove_redaction(&mut self, id: &str) -> bool {
        if let Some(pos) = self.redactions.iter().position(|r| r.id == id) {
            self.redactions.remove(pos);
            if self.selected.as_deref() == Some(id) {
                self.selected = None;
            }
            true
        } else {
            false
        }
    }

    pub fn update_redaction(&mut self, id: &str, update: RedactionUpdate) -> Result<()> {
        if let Some(parts) = &update.parts {
            validate_parts(parts)?;
        }
        let redaction = self.get_mut(id)?;

        if let Some(should_apply) = update.should_apply {
            redaction.should_apply = Some(should_apply);
        }
        if let Some(is_indeterminate) = update.is_indeterminate {
            redaction.is_indeterminate = is_indeterminate;
        }
        if let Some(reason) = update.reason {
            redaction.reason = Some(reason);
        }
        if let Some(rule) = update.rule {
            redaction.rule = rule;
        }
        if let Some(parts) = update.parts {
            redaction.parts = parts;
        }
        Ok(())
    }

    /// Flip apply/skip. A pending suggestion becomes decided.
    pub fn toggle_should_apply(&mut self, id: &str) -> Result<bool> {
        let redaction = self.get_mut(id)?;
        let next = if redaction.is_indeterminate {
            true
        } else {
            !redaction.applies()
        };
        redaction.should_apply = Some(next);
        redaction.is_indeterminate = false;
        Ok(next)
    }

    pub fn accept_suggestion(&mut self, id: &str) -> Result<()> {
        self.decide(id, true)
    }

    pub fn reject_suggestion(&mut self, id: &str) -> Result<()> {
        self.decide(id, false)
    }

    fn decide(&mut self, id: &str, apply: bool) -> Result<()> {
        let redaction = self.get_mut(id)?;
        redaction.is_indeterminate = false;
        redaction.should_apply = Some(apply);
        Ok(())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Redaction> {
        self.redactions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RedactError::UnknownRedaction(id.to_string()))
    }

    /// Merge classifier suggestions into the working set.
    ///
    /// Suggestions whose id is already present are ignored. Malformed entries
    /// are skipped and counted rather than failing the whole batch.
    pub fn ingest_suggestions(&mut self, inputs: Vec<SuggestionInput>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut seen: HashSet<RedactionId> = self.redactions.iter().map(|r| r.id.clone()).collect();

        for input in inputs {
            if let Some(id) = &input.id {
                if seen.contains(id) {
                    report.duplicates += 1;
                    continue;
                }
            }
            match suggestion_to_redaction(input) {
                Ok(redaction) => {
                    seen.insert(redaction.id.clone());
                    self.redactions.push(redaction);
                    report.accepted += 1;
                }
                Err(e) => {
                    tracing::debug!("Skipping suggestion: {}", e);
                    report.skipped += 1;
                }
            }
        }

        if report.skipped > 0 {
            tracing::warn!(
                "Skipped {} malformed suggestion(s), accepted {}",
                report.skipped,
                report.accepted
            );
        }
        report
    }

    pub fn select(&mut self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                self.get_mut(id)?;
                self.selected = Some(id.to_string());
            }
            None => self.selected = None,
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<&Redaction> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn highlight(&self) -> Option<&HighlightInProgress> {
        self.highlight.as_ref()
    }

    /// Start a gesture, replacing any unfinished one.
    pub fn begin_highlight(&mut self, highlight: HighlightInProgress) {
        self.highlight = Some(highlight);
    }

    /// Move the free end of the current gesture.
    pub fn update_highlight(&mut self, to: Point) -> Result<()> {
        match &mut self.highlight {
            Some(HighlightInProgress::Freeform { current, .. }) => {
                *current = to;
                Ok(())
            }
            Some(HighlightInProgress::TextRange { .. }) => Err(RedactError::InvalidRegion(
                "Text selection is extended by word offset".into(),
            )),
            None => Err(RedactError::InvalidRegion("No highlight in progress".into())),
        }
    }

    pub fn extend_text_selection(&mut self, word_offset: usize) -> Result<()> {
        match &mut self.highlight {
            Some(HighlightInProgress::TextRange { end, .. }) => {
                *end = word_offset;
                Ok(())
            }
            _ => Err(RedactError::InvalidRegion(
                "No text selection in progress".into(),
            )),
        }
    }

    pub fn cancel_highlight(&mut self) {
        self.highlight = None;
    }

    /// Finish the gesture. A gesture that encloses no area is dropped and
    /// yields `None`.
    pub fn commit_highlight(&mut self, pages: &[PageData]) -> Result<Option<RedactionId>> {
        let Some(highlight) = self.highlight.take() else {
            return Ok(None);
        };
        let page_index = highlight.page_index();
        let page = pages.get(page_index as usize).ok_or_else(|| {
            RedactError::InvalidRegion(format!(
                "Page {} out of range ({} pages)",
                page_index,
                pages.len()
            ))
        })?;

        let parts = finalize_highlight(page, &highlight)?;
        if parts.iter().all(|p| p.area() <= 0.0) {
            return Ok(None);
        }
        let redaction = Redaction::new(page_index, parts)?;
        let id = self.add_redaction(redaction)?;
        self.selected = Some(id.clone());
        Ok(Some(id))
    }

    /// Add one redaction per search hit.
    pub fn add_search_results(
        &mut self,
        page_index: u32,
        hits: &[Vec<Quad>],
        metadata: &RedactionMetadata,
    ) -> Result<Vec<RedactionId>> {
        hits.iter()
            .map(|quads| {
                let redaction = result_to_redaction(quads, page_index, metadata.clone())?;
                self.add_redaction(redaction)
            })
            .collect()
    }

    pub fn redactions_for_page(&self, page_index: u32) -> impl Iterator<Item = &Redaction> {
        self.redactions
            .iter()
            .filter(move |r| r.page_index == page_index)
    }

    /// Topmost redaction under a point, for click selection.
    pub fn redaction_at(&self, page_index: u32, point: Point) -> Option<&Redaction> {
        self.redactions_for_page(page_index)
            .filter(|r| r.parts.iter().any(|p| p.bbox().contains_point(point)))
            .last()
    }

    pub fn grouped_by_page(&self) -> BTreeMap<u32, Vec<&Redaction>> {
        let mut groups: BTreeMap<u32, Vec<&Redaction>> = BTreeMap::new();
        for r in &self.redactions {
            groups.entry(r.page_index).or_default().push(r);
        }
        groups
    }

    /// Redactions an export hands back to the caller.
    pub fn accepted(&self) -> Vec<Redaction> {
        self.redactions
            .iter()
            .filter(|r| r.is_accepted())
            .cloned()
            .collect()
    }

    pub fn redaction_text(&self, id: &str, pages: &[PageData]) -> Result<String> {
        let redaction = self
            .get(id)
            .ok_or_else(|| RedactError::UnknownRedaction(id.to_string()))?;
        Ok(pages
            .get(redaction.page_index as usize)
            .map(|page| get_redaction_text(redaction, page))
            .unwrap_or_default())
    }
}

fn suggestion_to_redaction(input: SuggestionInput) -> Result<Redaction> {
    let mut quads = input
        .quads
        .iter()
        .map(|q| Quad::from_slice(q))
        .collect::<Result<Vec<_>>>()?;
    quads.extend(input.parts.iter().map(RedactionPart::to_quad));

    let mut redaction = result_to_redaction(
        &quads,
        input.page_index,
        RedactionMetadata {
            should_apply: input.should_apply,
            reason: input.reason,
            rule: input.rule,
            ..RedactionMetadata::suggestion(None)
        },
    )?;
    if let Some(id) = input.id {
        redaction.id = id;
    }
    Ok(redaction)
}
