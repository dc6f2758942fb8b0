//! # openai-batch
//!
//! A minimal async client for the two endpoint families a batch workload
//! needs: **files** (upload a `.jsonl` request file, download a result file,
//! delete) and **batches** (create, retrieve, cancel).
//!
//! Both Azure OpenAI and the public OpenAI API are supported. They share the
//! same JSON shapes and differ only in URL layout and authentication:
//!
//! | Flavour | URL | Auth header |
//! |---------|-----|-------------|
//! | Azure   | `{endpoint}/openai/{path}?api-version={v}` | `api-key: …` |
//! | OpenAI  | `{base_url}/{path}` | `Authorization: Bearer …` |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use openai_batch::{BatchClient, BatchStatus};
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), openai_batch::BatchApiError> {
//! let client = BatchClient::from_env()?;
//! let file = client.upload_file(Path::new("requests.jsonl"), "batch").await?;
//! let batch = client
//!     .create_batch(&file.id, "/chat/completions", "24h", HashMap::new())
//!     .await?;
//! let batch = client.retrieve_batch(&batch.id).await?;
//! if batch.status == BatchStatus::Completed {
//!     let bytes = client.file_content(batch.output_file_id.as_deref().unwrap()).await?;
//!     println!("{} bytes of results", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment variables
//!
//! - `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_API_VERSION`
//!   select the Azure flavour when the endpoint and key are both set.
//! - `OPENAI_API_KEY` (+ optional `OPENAI_BASE_URL`) selects the OpenAI flavour.

use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use reqwest::StatusCode;

// ── Public constants ─────────────────────────────────────────────────────────

/// Azure API version used when `AZURE_OPENAI_API_VERSION` is not set.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Base URL of the public OpenAI API.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by [`BatchClient`] operations.
#[derive(Error, Debug)]
pub enum BatchApiError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The request never produced a response (DNS, TLS, timeout, …).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A local file could not be read for upload.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable is missing or empty.
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The response body did not match the documented JSON shape.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BatchApiError {
    /// HTTP status of the failed call, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BatchApiError::Http { status, .. } => Some(*status),
            BatchApiError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Which API family the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// Azure OpenAI resource, e.g. `https://my-resource.openai.azure.com`.
    Azure { endpoint: String, api_version: String },
    /// OpenAI or any compatible server exposing `/files` and `/batches`.
    OpenAi { base_url: String },
}

/// Connection settings for [`BatchClient`].
#[derive(Clone)]
pub struct BatchClientConfig {
    pub flavor: ApiFlavor,
    pub api_key: String,
    /// Per-request timeout. Uploads of 150 MB files need a generous value.
    pub timeout: Duration,
}

impl std::fmt::Debug for BatchClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchClientConfig")
            .field("flavor", &self.flavor)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BatchClientConfig {
    /// Read connection settings from the environment.
    ///
    /// Azure variables win when both `AZURE_OPENAI_ENDPOINT` and
    /// `AZURE_OPENAI_API_KEY` are set; otherwise `OPENAI_API_KEY` is required.
    pub fn from_env() -> Result<Self, BatchApiError> {
        let azure_endpoint = non_empty_env("AZURE_OPENAI_ENDPOINT");
        let azure_key = non_empty_env("AZURE_OPENAI_API_KEY");

        if let (Some(endpoint), Some(api_key)) = (azure_endpoint, azure_key) {
            let api_version = non_empty_env("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
            return Ok(Self {
                flavor: ApiFlavor::Azure {
                    endpoint,
                    api_version,
                },
                api_key,
                timeout: Duration::from_secs(600),
            });
        }

        let api_key = non_empty_env("OPENAI_API_KEY").ok_or(BatchApiError::MissingEnv(
            "AZURE_OPENAI_API_KEY or OPENAI_API_KEY",
        ))?;
        let base_url = non_empty_env("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        Ok(Self {
            flavor: ApiFlavor::OpenAi { base_url },
            api_key,
            timeout: Duration::from_secs(600),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Wire types ───────────────────────────────────────────────────────────────

/// A file object as returned by `POST /files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Lifecycle states of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    Failed,
    InProgress,
    Finalizing,
    Completed,
    Expired,
    Cancelling,
    Cancelled,
}

impl BatchStatus {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Expired
                | BatchStatus::Cancelled
        )
    }
}

/// One entry of a batch's validation/processing error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchErrorEntry {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchErrors {
    #[serde(default)]
    pub data: Vec<BatchErrorEntry>,
}

/// Per-request counters reported while a batch runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// A batch object as returned by `/batches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub status: BatchStatus,
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub errors: Option<BatchErrors>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl Batch {
    /// Human-readable summary of the batch's error list, if any.
    pub fn error_summary(&self) -> Option<String> {
        let errors = self.errors.as_ref()?;
        let parts: Vec<String> = errors
            .data
            .iter()
            .map(|e| {
                let code = e.code.as_deref().unwrap_or("error");
                let msg = e.message.as_deref().unwrap_or("");
                match e.line {
                    Some(line) => format!("{code} (line {line}): {msg}"),
                    None => format!("{code}: {msg}"),
                }
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

#[derive(Serialize)]
struct CreateBatchRequest<'a> {
    input_file_id: &'a str,
    endpoint: &'a str,
    completion_window: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Async client for the files and batches endpoints.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct BatchClient {
    http: reqwest::Client,
    config: BatchClientConfig,
}

impl BatchClient {
    pub fn new(config: BatchClientConfig) -> Result<Self, BatchApiError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    /// Build a client from environment variables (see crate docs).
    pub fn from_env() -> Result<Self, BatchApiError> {
        Self::new(BatchClientConfig::from_env()?)
    }

    pub fn flavor(&self) -> &ApiFlavor {
        &self.config.flavor
    }

    /// Upload a local file. `purpose` is `"batch"` for request files.
    pub async fn upload_file(&self, path: &Path, purpose: &str) -> Result<FileObject, BatchApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| BatchApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.jsonl".to_string());
        debug!("Uploading {} ({} bytes)", file_name, bytes.len());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", purpose.to_string()).part("file", part);

        let request = self.authed(self.http.post(self.url("files"))).multipart(form);
        self.send_json(request).await
    }

    /// Create a batch over a previously uploaded request file.
    pub async fn create_batch(
        &self,
        input_file_id: &str,
        endpoint: &str,
        completion_window: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Batch, BatchApiError> {
        let body = CreateBatchRequest {
            input_file_id,
            endpoint,
            completion_window,
            metadata,
        };
        let request = self.authed(self.http.post(self.url("batches"))).json(&body);
        self.send_json(request).await
    }

    pub async fn retrieve_batch(&self, batch_id: &str) -> Result<Batch, BatchApiError> {
        let request = self.authed(self.http.get(self.url(&format!("batches/{batch_id}"))));
        self.send_json(request).await
    }

    pub async fn cancel_batch(&self, batch_id: &str) -> Result<Batch, BatchApiError> {
        let request = self.authed(
            self.http
                .post(self.url(&format!("batches/{batch_id}/cancel"))),
        );
        self.send_json(request).await
    }

    /// Download the raw bytes of a file (e.g. a batch output file).
    pub async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, BatchApiError> {
        let request = self.authed(self.http.get(self.url(&format!("files/{file_id}/content"))));
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchApiError::Http { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Delete a file. A missing file (HTTP 404) counts as already deleted.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), BatchApiError> {
        let request = self.authed(self.http.delete(self.url(&format!("files/{file_id}"))));
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BatchApiError::Http { status, body })
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        build_url(&self.config.flavor, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.flavor {
            ApiFlavor::Azure { .. } => request.header("api-key", &self.config.api_key),
            ApiFlavor::OpenAi { .. } => request.bearer_auth(&self.config.api_key),
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BatchApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BatchApiError::Http { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn build_url(flavor: &ApiFlavor, path: &str) -> String {
    match flavor {
        ApiFlavor::Azure {
            endpoint,
            api_version,
        } => format!(
            "{}/openai/{}?api-version={}",
            endpoint.trim_end_matches('/'),
            path,
            api_version
        ),
        ApiFlavor::OpenAi { base_url } => {
            format!("{}/{}", base_url.trim_end_matches('/'), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_url_layout() {
        let flavor = ApiFlavor::Azure {
            endpoint: "https://res.openai.azure.com/".into(),
            api_version: "2024-10-21".into(),
        };
        assert_eq!(
            build_url(&flavor, "batches/b1"),
            "https://res.openai.azure.com/openai/batches/b1?api-version=2024-10-21"
        );
    }

    #[test]
    fn openai_url_layout() {
        let flavor = ApiFlavor::OpenAi {
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
        };
        assert_eq!(
            build_url(&flavor, "files/f1/content"),
            "https://api.openai.com/v1/files/f1/content"
        );
    }

    #[test]
    fn batch_deserialises_with_optional_fields_missing() {
        let json = r#"{"id":"batch_1","status":"in_progress","input_file_id":"file_1"}"#;
        let batch: Batch = serde_json::from_str(json).expect("valid batch");
        assert_eq!(batch.status, BatchStatus::InProgress);
        assert!(batch.output_file_id.is_none());
        assert!(!batch.status.is_terminal());
    }

    #[test]
    fn error_summary_lists_every_entry() {
        let json = r#"{
            "id":"batch_1","status":"failed","input_file_id":"file_1",
            "errors":{"data":[
                {"code":"invalid_json","message":"bad line","line":3},
                {"code":"too_large","message":"file too big"}
            ]}
        }"#;
        let batch: Batch = serde_json::from_str(json).expect("valid batch");
        let summary = batch.error_summary().expect("has errors");
        assert!(summary.contains("invalid_json (line 3): bad line"), "got: {summary}");
        assert!(summary.contains("too_large: file too big"), "got: {summary}");
        assert!(batch.status.is_terminal());
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = BatchClientConfig {
            flavor: ApiFlavor::OpenAi {
                base_url: DEFAULT_OPENAI_BASE_URL.into(),
            },
            api_key: "sk-secret".into(),
            timeout: Duration::from_secs(1),
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
