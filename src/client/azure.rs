//! [`RemoteJobClient`] over the OpenAI / Azure OpenAI batch endpoints.
//!
//! Maps the wire client's [`BatchApiError`] into the pipeline's taxonomy:
//! batch creation answered with an HTTP status is a submission rejection,
//! every other failure is a transport error.

use super::{Job, JobStatus, RemoteFileHandle, RemoteJobClient, RemoteResource, ResultHandle};
use crate::error::ParallexError;
use async_trait::async_trait;
use openai_batch::{BatchApiError, BatchClient, BatchStatus, StatusCode};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Endpoint every request line targets.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/chat/completions";

/// Azure and OpenAI both only accept a 24 h completion window.
pub const COMPLETION_WINDOW: &str = "24h";

/// Batch-API backed [`RemoteJobClient`].
#[derive(Debug, Clone)]
pub struct AzureBatchClient {
    inner: BatchClient,
}

impl AzureBatchClient {
    pub fn new(inner: BatchClient) -> Self {
        Self { inner }
    }

    /// Build from `AZURE_OPENAI_*` or `OPENAI_*` environment variables.
    pub fn from_env() -> Result<Self, ParallexError> {
        BatchClient::from_env()
            .map(Self::new)
            .map_err(|e| ParallexError::InvalidConfig(format!("Remote client: {e}")))
    }
}

#[async_trait]
impl RemoteJobClient for AzureBatchClient {
    async fn upload(&self, local_path: &Path) -> Result<RemoteFileHandle, ParallexError> {
        let file = self
            .inner
            .upload_file(local_path, "batch")
            .await
            .map_err(|e| ParallexError::transport("upload", e))?;
        Ok(RemoteFileHandle {
            id: file.id,
            name: file.filename,
            purpose: file.purpose,
            status: file.status,
        })
    }

    async fn submit_job(&self, file_id: &str, trace_id: Uuid) -> Result<Job, ParallexError> {
        let metadata = HashMap::from([("trace_id".to_string(), trace_id.to_string())]);
        let batch = self
            .inner
            .create_batch(file_id, CHAT_COMPLETIONS_ENDPOINT, COMPLETION_WINDOW, metadata)
            .await
            .map_err(|e| match e {
                BatchApiError::Http { status, body } => ParallexError::Submission {
                    file_id: file_id.to_string(),
                    trace_id,
                    detail: format!("HTTP {status}: {body}"),
                },
                other => ParallexError::transport("submit job", other),
            })?;
        Ok(Job {
            id: batch.id,
            trace_id,
            remote_file_id: file_id.to_string(),
        })
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, ParallexError> {
        let batch = self
            .inner
            .retrieve_batch(job_id)
            .await
            .map_err(|e| ParallexError::transport("poll status", e))?;
        debug!("Batch {} status {:?}", job_id, batch.status);

        Ok(match batch.status {
            BatchStatus::Completed => JobStatus::Succeeded,
            BatchStatus::Expired => JobStatus::Expired,
            BatchStatus::Failed => JobStatus::Failed {
                reason: batch
                    .error_summary()
                    .unwrap_or_else(|| "batch failed".to_string()),
            },
            BatchStatus::Cancelled => JobStatus::Failed {
                reason: "batch was cancelled".to_string(),
            },
            BatchStatus::Validating
            | BatchStatus::InProgress
            | BatchStatus::Finalizing
            | BatchStatus::Cancelling => JobStatus::Running,
        })
    }

    async fn fetch_result(&self, job_id: &str) -> Result<ResultHandle, ParallexError> {
        let batch = self
            .inner
            .retrieve_batch(job_id)
            .await
            .map_err(|e| ParallexError::transport("fetch result", e))?;
        let file_id = batch.output_file_id.ok_or_else(|| ParallexError::Decode {
            job_id: job_id.to_string(),
            detail: "completed batch has no output file".to_string(),
        })?;
        Ok(ResultHandle {
            job_id: job_id.to_string(),
            file_id,
        })
    }

    async fn read(&self, handle: &ResultHandle) -> Result<Vec<u8>, ParallexError> {
        self.inner
            .file_content(&handle.file_id)
            .await
            .map_err(|e| ParallexError::transport("read result", e))
    }

    async fn delete(&self, resource: &RemoteResource) -> Result<(), ParallexError> {
        match resource {
            RemoteResource::File(id) => self
                .inner
                .delete_file(id)
                .await
                .map_err(|e| ParallexError::transport("delete file", e)),
            // Batches cannot be deleted; a job that is still running is
            // cancelled, a finished one needs nothing.
            RemoteResource::Job(id) => {
                let batch = match self.inner.retrieve_batch(id).await {
                    Ok(batch) => batch,
                    Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => return Ok(()),
                    Err(e) => return Err(ParallexError::transport("cancel job", e)),
                };
                if batch.status.is_terminal() || batch.status == BatchStatus::Cancelling {
                    return Ok(());
                }
                self.inner
                    .cancel_batch(id)
                    .await
                    .map(|_| ())
                    .map_err(|e| ParallexError::transport("cancel job", e))
            }
        }
    }
}
