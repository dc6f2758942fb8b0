//! The remote job client seam.
//!
//! The pipeline never speaks HTTP itself. Everything it needs from the
//! remote completion service is captured by [`RemoteJobClient`]: upload a
//! request file, turn it into a job, poll the job, fetch and read its result
//! file, delete what was created. [`azure::AzureBatchClient`] implements the
//! trait over the `openai-batch` crate; tests implement it in memory.

pub mod azure;

use crate::error::ParallexError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

pub use azure::AzureBatchClient;

/// A file stored on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileHandle {
    pub id: String,
    pub name: String,
    pub purpose: String,
    pub status: Option<String>,
}

/// A job created from one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub trace_id: Uuid,
    pub remote_file_id: String,
}

/// What a status poll reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, validating, running or finalising.
    Running,
    Succeeded,
    Failed { reason: String },
    Expired,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Points at the result payload of a succeeded job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultHandle {
    pub job_id: String,
    /// Remote file holding the line-delimited results.
    pub file_id: String,
}

/// Anything created remotely during a run that must be removed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteResource {
    File(String),
    Job(String),
}

impl RemoteResource {
    pub fn id(&self) -> &str {
        match self {
            RemoteResource::File(id) | RemoteResource::Job(id) => id,
        }
    }
}

impl fmt::Display for RemoteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteResource::File(id) => write!(f, "file {id}"),
            RemoteResource::Job(id) => write!(f, "job {id}"),
        }
    }
}

/// Capabilities the pipeline needs from the remote completion service.
///
/// Every method is a suspension point. Implementations must be safe to call
/// from many concurrent tasks.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Upload a line-delimited request file.
    ///
    /// Fails with [`ParallexError::Transport`] on network or auth failure.
    async fn upload(&self, local_path: &Path) -> Result<RemoteFileHandle, ParallexError>;

    /// Create a job over an uploaded file.
    ///
    /// Fails with [`ParallexError::Submission`] if the remote side rejects it.
    async fn submit_job(&self, file_id: &str, trace_id: Uuid) -> Result<Job, ParallexError>;

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, ParallexError>;

    /// Locate the result payload of a succeeded job.
    async fn fetch_result(&self, job_id: &str) -> Result<ResultHandle, ParallexError>;

    async fn read(&self, handle: &ResultHandle) -> Result<Vec<u8>, ParallexError>;

    /// Remove a remote resource. Absence of the resource is not an error.
    async fn delete(&self, resource: &RemoteResource) -> Result<(), ParallexError>;
}
