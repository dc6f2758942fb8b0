//! Batch packing: page images → line-delimited upload units.
//!
//! Each page becomes one JSON line: a chat-completions request whose user
//! message carries the prompt text and the page PNG as a base64 data URI,
//! tagged with a [`custom_id`](super::custom_id) so the result can be matched
//! back to the page.
//!
//! ## Sealing rule
//!
//! Before a line is appended, the current unit is sealed if its size
//! **already exceeds** `max_unit_bytes` (or, with
//! [`BatchGranularity::PerPage`], if it already holds a page). The check is
//! late rather than look-ahead, so a unit can overshoot the ceiling by at
//! most one line. A page larger than the ceiling on its own still becomes a
//! unit of its own; a page larger than `upload_limit_bytes` cannot be
//! uploaded at all and is rejected.

use super::custom_id;
use crate::config::{BatchGranularity, ParallexConfig};
use crate::error::ParallexError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use uuid::Uuid;

/// One rasterised page, ready to be packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifact {
    pub trace_id: Uuid,
    /// 1-indexed, unique within the trace.
    pub page_number: usize,
    /// PNG file on local disk.
    pub path: PathBuf,
    pub prompt_text: Arc<str>,
}

/// A sealed line-delimited request file, submitted as one remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    pub trace_id: Uuid,
    /// Position among the trace's units, starting at 0.
    pub sequence_index: usize,
    pub path: PathBuf,
    /// Bytes written, including line terminators.
    pub size_bytes: u64,
    /// Pages in this unit, in append order.
    pub page_numbers: Vec<usize>,
}

// ── Request line wire format ─────────────────────────────────────────────

#[derive(Serialize)]
struct RequestLine<'a> {
    custom_id: String,
    method: &'static str,
    url: &'static str,
    body: RequestBody<'a>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// ── Packer ───────────────────────────────────────────────────────────────

/// Groups page artifacts into upload units no larger than a byte ceiling.
#[derive(Debug, Clone)]
pub struct BatchPacker {
    model: String,
    max_tokens: u32,
    max_unit_bytes: u64,
    upload_limit_bytes: u64,
    granularity: BatchGranularity,
}

impl BatchPacker {
    /// A packer for `model` using the default limits of [`ParallexConfig`].
    pub fn new(model: impl Into<String>, max_unit_bytes: u64) -> Self {
        let defaults = ParallexConfig::default();
        Self {
            model: model.into(),
            max_tokens: defaults.max_tokens,
            max_unit_bytes,
            upload_limit_bytes: defaults.upload_limit_bytes.max(max_unit_bytes),
            granularity: defaults.granularity,
        }
    }

    pub fn from_config(config: &ParallexConfig) -> Result<Self, ParallexError> {
        Ok(Self {
            model: config.require_model()?.to_string(),
            max_tokens: config.max_tokens,
            max_unit_bytes: config.max_unit_bytes,
            upload_limit_bytes: config.upload_limit_bytes,
            granularity: config.granularity,
        })
    }

    pub fn with_granularity(mut self, granularity: BatchGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_upload_limit(mut self, bytes: u64) -> Self {
        self.upload_limit_bytes = bytes;
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    /// Serialise one page as a request line (without the trailing newline).
    pub fn encode_line(&self, artifact: &PageArtifact, image: &[u8]) -> Result<String, ParallexError> {
        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(image));
        let line = RequestLine {
            custom_id: custom_id::encode(artifact.trace_id, artifact.page_number),
            method: "POST",
            url: "/chat/completions",
            body: RequestBody {
                model: &self.model,
                messages: [Message {
                    role: "user",
                    content: [
                        ContentPart::Text {
                            text: &artifact.prompt_text,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_uri },
                        },
                    ],
                }],
                max_tokens: self.max_tokens,
            },
        };
        serde_json::to_string(&line)
            .map_err(|e| ParallexError::Internal(format!("request line serialisation: {e}")))
    }

    /// Pack `artifacts`, in order, into unit files under `dir`.
    ///
    /// Every unit file is flushed and closed before it is returned. Units
    /// come back in the order of their first page; no artifact is reordered.
    pub async fn pack(
        &self,
        artifacts: &[PageArtifact],
        dir: &Path,
    ) -> Result<Vec<UploadUnit>, ParallexError> {
        let mut units = Vec::new();
        let mut current: Option<OpenUnit> = None;

        for artifact in artifacts {
            let image = tokio::fs::read(&artifact.path)
                .await
                .map_err(|e| ParallexError::io(&artifact.path, e))?;
            let line = self.encode_line(artifact, &image)?;
            let line_bytes = line.len() as u64 + 1;
            if line_bytes > self.upload_limit_bytes {
                return Err(ParallexError::InvalidConfig(format!(
                    "page {} serialises to {} bytes, above the upload limit of {} bytes; \
                     lower the DPI or raise the limit",
                    artifact.page_number, line_bytes, self.upload_limit_bytes
                )));
            }

            if let Some(open) = current.take() {
                if open.trace_id != artifact.trace_id {
                    return Err(ParallexError::Internal(format!(
                        "cannot pack trace {} into a unit of trace {}",
                        artifact.trace_id, open.trace_id
                    )));
                }
                if self.should_seal(&open) {
                    units.push(open.seal().await?);
                } else {
                    current = Some(open);
                }
            }

            if current.is_none() {
                current = Some(OpenUnit::create(dir, artifact.trace_id, units.len()).await?);
            }
            if let Some(open) = current.as_mut() {
                open.append(&line, artifact.page_number).await?;
            }
        }

        if let Some(open) = current.take() {
            units.push(open.seal().await?);
        }

        info!(
            "Packed {} pages into {} upload units",
            artifacts.len(),
            units.len()
        );
        Ok(units)
    }

    fn should_seal(&self, open: &OpenUnit) -> bool {
        match self.granularity {
            BatchGranularity::PerPage => !open.page_numbers.is_empty(),
            BatchGranularity::WholeTrace => open.size_bytes > self.max_unit_bytes,
        }
    }
}

/// A unit still accepting lines.
struct OpenUnit {
    trace_id: Uuid,
    sequence_index: usize,
    path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
    size_bytes: u64,
    page_numbers: Vec<usize>,
}

impl OpenUnit {
    async fn create(dir: &Path, trace_id: Uuid, sequence_index: usize) -> Result<Self, ParallexError> {
        let path = dir.join(format!("{trace_id}-{sequence_index}.jsonl"));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ParallexError::io(&path, e))?;
        Ok(Self {
            trace_id,
            sequence_index,
            path,
            writer: BufWriter::new(file),
            size_bytes: 0,
            page_numbers: Vec::new(),
        })
    }

    async fn append(&mut self, line: &str, page_number: usize) -> Result<(), ParallexError> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ParallexError::io(&self.path, e))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| ParallexError::io(&self.path, e))?;
        self.size_bytes += line.len() as u64 + 1;
        self.page_numbers.push(page_number);
        Ok(())
    }

    async fn seal(mut self) -> Result<UploadUnit, ParallexError> {
        self.writer
            .flush()
            .await
            .map_err(|e| ParallexError::io(&self.path, e))?;
        self.writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| ParallexError::io(&self.path, e))?;
        debug!(
            "Sealed unit {} ({} pages, {} bytes)",
            self.sequence_index,
            self.page_numbers.len(),
            self.size_bytes
        );
        Ok(UploadUnit {
            trace_id: self.trace_id,
            sequence_index: self.sequence_index,
            path: self.path,
            size_bytes: self.size_bytes,
            page_numbers: self.page_numbers,
        })
    }
}
