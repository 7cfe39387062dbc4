//! Redactor CLI
//!
//! Inspects PDFs and commits redaction files into them. Document work runs on
//! a worker thread behind a [`DocumentHandle`]; results go to stdout as JSON
//! or to the requested output file, logs go to stderr.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use redactor_core::{
    parse_ranges, DocumentHandle, DocumentRequest, DocumentResponse, Redaction,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "redactor")]
#[command(version, about = "Find, mark and irreversibly redact content in PDF files")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the words of each page with their page-space boxes
    Words {
        input: PathBuf,
        /// Pages to include, e.g. "1-3, 5" (default: all)
        #[arg(short, long)]
        pages: Option<String>,
    },
    /// Find text and print the quads of every hit
    Search {
        input: PathBuf,
        needle: String,
        #[arg(short, long)]
        pages: Option<String>,
        /// Write the hits as a redaction file instead of printing quads
        #[arg(long)]
        redactions: Option<PathBuf>,
    },
    /// Extract existing redaction markers into a redaction file
    Import {
        input: PathBuf,
        /// Redaction file to write
        #[arg(short, long)]
        output: PathBuf,
        /// Also write the document with the markers stripped
        #[arg(long)]
        stripped: Option<PathBuf>,
    },
    /// Render a low-fidelity layout preview of one page as PNG
    Preview {
        input: PathBuf,
        /// 1-based page number
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Pixels per point
        #[arg(short, long, default_value = "1.0")]
        scale: f64,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Commit a redaction file into the document
    Redact {
        input: PathBuf,
        /// JSON array of redactions
        #[arg(short, long)]
        redactions: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Record the regions without removing anything
        #[arg(long)]
        no_apply: bool,
        /// Leave switched-off redactions out instead of outlining them
        #[arg(long)]
        drop_unapplied: bool,
        /// Placeholder text for redactions without a reason
        #[arg(long)]
        label: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries results, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let handle = DocumentHandle::spawn(config.worker.timeout())
        .context("Failed to start document worker")?;

    match args.command {
        Command::Words { input, pages } => {
            let page_count = load(&handle, &input).await?;
            let mut output = Vec::new();
            for page_index in select_pages(pages.as_deref(), page_count)? {
                let data = match request(&handle, DocumentRequest::PageData {
                    page_index,
                    render_scale: None,
                })
                .await?
                {
                    DocumentResponse::PageData { data, .. } => data,
                    other => bail!("Unexpected response: {:?}", other),
                };
                output.push(json!({ "page_index": page_index, "words": data.words }));
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Search {
            input,
            needle,
            pages,
            redactions,
        } => {
            let page_count = load(&handle, &input).await?;
            let mut found = Vec::new();
            for page_index in select_pages(pages.as_deref(), page_count)? {
                let hits = match request(&handle, DocumentRequest::Search {
                    page_index,
                    needle: needle.clone(),
                })
                .await?
                {
                    DocumentResponse::SearchHits { hits, .. } => hits,
                    other => bail!("Unexpected response: {:?}", other),
                };
                found.extend(hits.into_iter().map(|quads| (page_index, quads)));
            }
            tracing::info!("Found {} matches for {:?}", found.len(), needle);

            match redactions {
                Some(path) => {
                    let records = found
                        .iter()
                        .map(|(page_index, quads)| {
                            redactor_core::result_to_redaction(quads, *page_index, Default::default())
                        })
                        .collect::<redactor_core::Result<Vec<Redaction>>>()?;
                    write_json(&path, &records)?;
                }
                None => {
                    let output: Vec<_> = found
                        .iter()
                        .map(|(page_index, quads)| json!({ "page_index": page_index, "quads": quads }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }

        Command::Import {
            input,
            output,
            stripped,
        } => {
            load(&handle, &input).await?;
            let (redactions, skipped) = match request(&handle, DocumentRequest::ImportAnnotations).await? {
                DocumentResponse::Imported {
                    redactions,
                    skipped,
                } => (redactions, skipped),
                other => bail!("Unexpected response: {:?}", other),
            };
            if skipped > 0 {
                tracing::warn!("Skipped {} markers without usable regions", skipped);
            }
            tracing::info!("Imported {} redactions", redactions.len());
            write_json(&output, &redactions)?;

            if let Some(path) = stripped {
                // Committing nothing bakes the stripped document as-is
                let bytes = commit(&handle, Vec::new(), config.pipeline.clone()).await?;
                std::fs::write(&path, bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }

        Command::Preview {
            input,
            page,
            scale,
            output,
        } => {
            let page_count = load(&handle, &input).await?;
            if page == 0 || page > page_count {
                bail!("Page {} out of range (document has {} pages)", page, page_count);
            }
            let data = match request(&handle, DocumentRequest::PageData {
                page_index: page - 1,
                render_scale: Some(scale),
            })
            .await?
            {
                DocumentResponse::PageData { data, .. } => data,
                other => bail!("Unexpected response: {:?}", other),
            };
            let png = data.image.context("Worker returned no image")?;
            std::fs::write(&output, png)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }

        Command::Redact {
            input,
            redactions,
            output,
            no_apply,
            drop_unapplied,
            label,
        } => {
            let mut options = config.pipeline.clone();
            options.apply &= !no_apply;
            options.keep_unapplied_markers &= !drop_unapplied;
            if let Some(label) = label {
                options.default_label = label;
            }

            let content = std::fs::read_to_string(&redactions)
                .with_context(|| format!("Failed to read {}", redactions.display()))?;
            let records: Vec<Redaction> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid redaction file: {}", redactions.display()))?;

            load(&handle, &input).await?;
            let bytes = commit(&handle, records, options).await?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!("Wrote {}", output.display());
        }
    }

    Ok(())
}

async fn request(handle: &DocumentHandle, request: DocumentRequest) -> anyhow::Result<DocumentResponse> {
    match handle.request(request).await? {
        DocumentResponse::Error { message, .. } => bail!(message),
        response => Ok(response),
    }
}

async fn load(handle: &DocumentHandle, path: &Path) -> anyhow::Result<u32> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let page_count = handle
        .load(bytes)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;
    tracing::info!("Loaded {} ({} pages)", path.display(), page_count);
    Ok(page_count)
}

async fn commit(
    handle: &DocumentHandle,
    redactions: Vec<Redaction>,
    options: redactor_core::PipelineOptions,
) -> anyhow::Result<Vec<u8>> {
    match request(handle, DocumentRequest::Redact {
        redactions,
        options,
    })
    .await?
    {
        DocumentResponse::Redacted {
            bytes,
            report,
            metrics,
        } => {
            tracing::info!(
                "Committed: {} staged, {} applied, {} skipped in {} ms",
                report.staged,
                report.applied,
                report.skipped,
                metrics.processing_time_ms
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(bytes)
        }
        other => bail!("Unexpected response: {:?}", other),
    }
}

fn select_pages(pages: Option<&str>, page_count: u32) -> anyhow::Result<Vec<u32>> {
    let selected = match pages {
        Some(ranges) => parse_ranges(ranges)?,
        None => (0..page_count).collect(),
    };
    if let Some(last) = selected.iter().find(|p| **p >= page_count) {
        bail!("Page {} out of range (document has {} pages)", last + 1, page_count);
    }
    Ok(selected)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_pages_defaults_to_all() {
        assert_eq!(select_pages(None, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(select_pages(Some("2-3"), 3).unwrap(), vec![1, 2]);
        assert!(select_pages(Some("4"), 3).is_err());
    }

    #[test]
    fn test_cli_parses_redact() {
        let args = Args::try_parse_from([
            "redactor",
            "redact",
            "in.pdf",
            "--redactions",
            "r.json",
            "--output",
            "out.pdf",
            "--no-apply",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Redact { no_apply: true, .. }));
    }
}
