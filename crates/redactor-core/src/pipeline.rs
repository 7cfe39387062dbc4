//! Redaction commit pipeline
//!
//! A single pass `Idle -> Staged -> Applied -> Baked -> Exported` over one
//! engine instance. Each step refuses to run out of order and any failure
//! aborts the run: the engine is dropped with the pipeline and no bytes are
//! produced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{DocumentEngine, PlaceholderStyle};
use crate::error::{RedactError, Result};
use crate::redaction::{redactions_to_annotations, ExportMode, Redaction, RedactionAnnotation};
use crate::scrub::RemovalStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Staged,
    Applied,
    Baked,
    Exported,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Staged => "staged",
            PipelineState::Applied => "applied",
            PipelineState::Baked => "baked",
            PipelineState::Exported => "exported",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

fn default_font_size() -> f64 {
    8.0
}

fn default_label() -> String {
    "REDACTED".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// `false` skips removal and baking and returns the source unchanged.
    #[serde(default = "default_true")]
    pub apply: bool,
    /// Stage and bake switched-off redactions as visible outlines instead of
    /// dropping them.
    #[serde(default = "default_true")]
    pub keep_unapplied_markers: bool,
    #[serde(default = "default_font_size")]
    pub placeholder_font_size: f64,
    #[serde(default = "default_label")]
    pub default_label: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            apply: true,
            keep_unapplied_markers: true,
            placeholder_font_size: default_font_size(),
            default_label: default_label(),
        }
    }
}

impl PipelineOptions {
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle {
            font_size: self.placeholder_font_size,
            default_label: self.default_label.clone(),
        }
    }

    /// Which redactions become annotation records.
    pub fn export_mode(&self) -> ExportMode {
        if self.keep_unapplied_markers {
            ExportMode::All
        } else {
            ExportMode::ApplyOnly
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub staged: usize,
    pub applied: usize,
    /// Annotations left unapplied: mark-only markers, dropped ones, or all of
    /// them when the run does not apply.
    pub skipped: usize,
    pub removed: RemovalStats,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub bytes: Vec<u8>,
    pub report: PipelineReport,
}

pub struct RedactionPipeline<E: DocumentEngine> {
    engine: E,
    state: PipelineState,
    style: PlaceholderStyle,
    keep_unapplied_markers: bool,
    staged_pages: Vec<u32>,
    report: PipelineReport,
}

impl<E: DocumentEngine> RedactionPipeline<E> {
    /// Load `source` into a fresh engine.
    pub fn open(source: &[u8], options: &PipelineOptions) -> Result<Self> {
        let engine = E::open(source).map_err(|e| RedactError::aborted(PipelineState::Idle, e))?;
        Ok(Self::with_engine(engine, options))
    }

    pub fn with_engine(engine: E, options: &PipelineOptions) -> Self {
        Self {
            engine,
            state: PipelineState::Idle,
            style: options.placeholder_style(),
            keep_unapplied_markers: options.keep_unapplied_markers,
            staged_pages: Vec::new(),
            report: PipelineReport::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    pub fn page_count(&self) -> Result<u32> {
        self.engine.page_count()
    }

    fn require(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RedactError::PipelineAborted {
                stage: self.state,
                reason: format!("step requires the {} state", expected),
            })
        }
    }

    fn abort(&self, err: RedactError) -> RedactError {
        tracing::warn!("Redaction pipeline aborted in {} state: {}", self.state, err);
        RedactError::aborted(self.state, err)
    }

    /// Put every annotation on its page as a redaction marker.
    pub fn stage(&mut self, annotations: &[RedactionAnnotation]) -> Result<usize> {
        self.require(PipelineState::Idle)?;
        self.stage_pages(annotations).map_err(|e| self.abort(e))?;
        self.state = PipelineState::Staged;
        tracing::info!("Staged {} redaction markers", self.report.staged);
        Ok(self.report.staged)
    }

    fn stage_pages(&mut self, annotations: &[RedactionAnnotation]) -> Result<()> {
        let page_count = self.engine.page_count()?;
        let mut by_page: BTreeMap<u32, Vec<RedactionAnnotation>> = BTreeMap::new();

        for annot in annotations {
            if !annot.apply && !self.keep_unapplied_markers {
                self.report.skipped += 1;
                continue;
            }
            if annot.page_index >= page_count {
                return Err(RedactError::InvalidRegion(format!(
                    "Annotation on page {} but the document has {} pages",
                    annot.page_index, page_count
                )));
            }
            by_page.entry(annot.page_index).or_default().push(annot.clone());
        }

        for (page_index, marks) in &by_page {
            self.report.staged += self.engine.stage_redactions(*page_index, marks)?;
            self.staged_pages.push(*page_index);
        }
        Ok(())
    }

    /// Remove content under every apply-flagged marker.
    pub fn apply(&mut self) -> Result<usize> {
        self.require(PipelineState::Staged)?;
        self.apply_pages().map_err(|e| self.abort(e))?;
        self.state = PipelineState::Applied;
        tracing::info!(
            "Applied {} redactions ({} glyphs, {} images, {} forms, {} paths, {} annotations removed)",
            self.report.applied,
            self.report.removed.glyphs,
            self.report.removed.images,
            self.report.removed.forms,
            self.report.removed.paths,
            self.report.removed.annotations
        );
        Ok(self.report.applied)
    }

    fn apply_pages(&mut self) -> Result<()> {
        for page_index in self.staged_pages.clone() {
            let outcome = self.engine.apply_staged(page_index, &self.style)?;
            self.report.applied += outcome.applied;
            self.report.skipped += outcome.kept;
            self.report.removed += outcome.removed;
        }
        Ok(())
    }

    /// Flatten annotations into page content. Skipped when nothing was staged.
    pub fn bake(&mut self) -> Result<()> {
        self.require(PipelineState::Applied)?;
        if self.report.staged > 0 {
            self.engine
                .bake_document(&self.style)
                .map_err(|e| self.abort(e))?;
            tracing::info!("Baked annotations on {} pages", self.staged_pages.len());
        }
        self.state = PipelineState::Baked;
        Ok(())
    }

    /// Serialize the result. Consumes the pipeline, releasing the engine.
    pub fn export(mut self) -> Result<PipelineOutput> {
        self.require(PipelineState::Baked)?;
        let bytes = self.engine.serialize().map_err(|e| self.abort(e))?;
        self.state = PipelineState::Exported;
        tracing::info!("Exported {} bytes", bytes.len());
        Ok(PipelineOutput {
            bytes,
            report: self.report,
        })
    }

    /// Every step in order.
    pub fn run(mut self, annotations: &[RedactionAnnotation]) -> Result<PipelineOutput> {
        self.stage(annotations)?;
        self.apply()?;
        self.bake()?;
        self.export()
    }
}

/// Commit annotation records into `source`.
pub fn run_pipeline<E: DocumentEngine>(
    source: &[u8],
    annotations: &[RedactionAnnotation],
    options: &PipelineOptions,
) -> Result<PipelineOutput> {
    if !options.apply {
        tracing::info!("Apply disabled, returning source unchanged");
        return Ok(PipelineOutput {
            bytes: source.to_vec(),
            report: PipelineReport {
                skipped: annotations.len(),
                ..PipelineReport::default()
            },
        });
    }
    RedactionPipeline::<E>::open(source, options)?.run(annotations)
}

/// Commit editing-session redactions into `source`. Indeterminate
/// suggestions never reach the document.
pub fn redact_document<E: DocumentEngine>(
    source: &[u8],
    redactions: &[Redaction],
    options: &PipelineOptions,
) -> Result<PipelineOutput> {
    if !options.apply {
        let decided = redactions.iter().filter(|r| !r.is_indeterminate).count();
        return Ok(PipelineOutput {
            bytes: source.to_vec(),
            report: PipelineReport {
                skipped: decided,
                ..PipelineReport::default()
            },
        });
    }
    let pipeline = RedactionPipeline::<E>::open(source, options)?;
    let page_count = pipeline.page_count()?;
    let annotations = redactions_to_annotations(redactions, page_count, options.export_mode())?;
    pipeline.run(&annotations)
}
