//! Request protocol for the document-hosting side
//!
//! Every call into a document engine is a [`DocumentRequest`] answered by a
//! [`DocumentResponse`]. Both serialize as JSON objects tagged by `type`, with
//! byte payloads as base64 strings.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::document::DocumentEngine;
use crate::error::{RedactError, Result};
use crate::geometry::{PageData, Quad};
use crate::pipeline::{redact_document, run_pipeline, PipelineOptions, PipelineOutput, PipelineReport};
use crate::redaction::{annotations_to_redactions, Redaction, RedactionAnnotation};

/// Serde adapter for byte buffers carried as base64 text.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocumentRequest {
    Load {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    PageCount,
    PageData {
        page_index: u32,
        #[serde(default)]
        render_scale: Option<f64>,
    },
    Search {
        page_index: u32,
        needle: String,
    },
    /// Pull the redaction markers out of the loaded document.
    ImportAnnotations,
    /// Commit annotation records.
    Apply {
        annotations: Vec<RedactionAnnotation>,
        #[serde(default)]
        options: PipelineOptions,
    },
    /// Commit editing-session redactions.
    Redact {
        redactions: Vec<Redaction>,
        #[serde(default)]
        options: PipelineOptions,
    },
    Close,
}

impl DocumentRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RedactError::SerializationError(e.to_string()))
    }

    /// Requests that change the hosted document.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            DocumentRequest::Load { .. }
                | DocumentRequest::ImportAnnotations
                | DocumentRequest::Apply { .. }
                | DocumentRequest::Redact { .. }
                | DocumentRequest::Close
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocumentResponse {
    Loaded {
        page_count: u32,
    },
    PageCount {
        page_count: u32,
    },
    PageData {
        page_index: u32,
        data: PageData,
    },
    SearchHits {
        page_index: u32,
        hits: Vec<Vec<Quad>>,
    },
    Imported {
        redactions: Vec<Redaction>,
        skipped: usize,
    },
    Redacted {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        report: PipelineReport,
        metrics: ProcessMetrics,
    },
    Closed,
    Error {
        message: String,
        /// The request itself was wrong; retrying it unchanged will fail again.
        caller_error: bool,
    },
}

impl DocumentResponse {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RedactError::SerializationError(e.to_string()))
    }

    pub fn error(err: &RedactError) -> Self {
        DocumentResponse::Error {
            message: err.to_string(),
            caller_error: err.is_caller_error(),
        }
    }
}

/// Owns one engine and the bytes it was last loaded from.
pub struct DocumentService<E: DocumentEngine> {
    engine: Option<E>,
    source: Option<Vec<u8>>,
}

impl<E: DocumentEngine> Default for DocumentService<E> {
    fn default() -> Self {
        Self {
            engine: None,
            source: None,
        }
    }
}

impl<E: DocumentEngine> DocumentService<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known-good bytes: the loaded document or the latest commit.
    pub fn source(&self) -> Option<&[u8]> {
        self.source.as_deref()
    }

    fn engine(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(RedactError::DocumentNotLoaded)
    }

    pub fn handle(&mut self, request: DocumentRequest) -> DocumentResponse {
        self.dispatch(request).unwrap_or_else(|e| {
            tracing::debug!("Request failed: {}", e);
            DocumentResponse::error(&e)
        })
    }

    fn dispatch(&mut self, request: DocumentRequest) -> Result<DocumentResponse> {
        match request {
            DocumentRequest::Load { bytes } => {
                let engine = E::open(&bytes)?;
                let page_count = engine.page_count()?;
                self.engine = Some(engine);
                self.source = Some(bytes);
                Ok(DocumentResponse::Loaded { page_count })
            }
            DocumentRequest::PageCount => Ok(DocumentResponse::PageCount {
                page_count: self.engine()?.page_count()?,
            }),
            DocumentRequest::PageData {
                page_index,
                render_scale,
            } => Ok(DocumentResponse::PageData {
                page_index,
                data: self.engine()?.page_data(page_index, render_scale)?,
            }),
            DocumentRequest::Search { page_index, needle } => Ok(DocumentResponse::SearchHits {
                page_index,
                hits: self.engine()?.search(page_index, &needle)?,
            }),
            DocumentRequest::ImportAnnotations => {
                let engine = self.engine.as_mut().ok_or(RedactError::DocumentNotLoaded)?;
                let imported = engine.import_annotations()?;
                if !imported.is_empty() {
                    self.source = Some(engine.serialize()?);
                }
                let (redactions, skipped) = annotations_to_redactions(&imported);
                Ok(DocumentResponse::Imported {
                    redactions,
                    skipped,
                })
            }
            DocumentRequest::Apply {
                annotations,
                options,
            } => self.commit(|source| run_pipeline::<E>(source, &annotations, &options)),
            DocumentRequest::Redact {
                redactions,
                options,
            } => self.commit(|source| redact_document::<E>(source, &redactions, &options)),
            DocumentRequest::Close => {
                self.engine = None;
                self.source = None;
                Ok(DocumentResponse::Closed)
            }
        }
    }

    /// Run a pipeline on the last known-good bytes. On success the output
    /// becomes the hosted document; on failure nothing changes.
    fn commit<F>(&mut self, run: F) -> Result<DocumentResponse>
    where
        F: FnOnce(&[u8]) -> Result<PipelineOutput>,
    {
        let start = Instant::now();
        let source = self.source.as_deref().ok_or(RedactError::DocumentNotLoaded)?;
        let input_size_bytes = source.len();
        let PipelineOutput { bytes, report } = run(source)?;

        let engine = E::open(&bytes)?;
        let page_count = engine.page_count()?;
        self.engine = Some(engine);
        self.source = Some(bytes.clone());

        let metrics = ProcessMetrics {
            input_size_bytes,
            output_size_bytes: bytes.len(),
            page_count,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };
        Ok(DocumentResponse::Redacted {
            bytes,
            report,
            metrics,
        })
    }
}
