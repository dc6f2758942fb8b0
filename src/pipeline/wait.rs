//! Waiting for a submitted job to finish.
//!
//! Each job moves through an explicit state machine:
//!
//! ```text
//! Submitted ──▶ Running ──▶ Running ──▶ … ──▶ Succeeded | Failed | Expired
//! ```
//!
//! [`CompletionWaiter::await_completion`] polls the remote status, feeding
//! every answer into [`JobState::on_status`], and sleeps between polls on an
//! injectable [`Clock`] following the configured [`PollPolicy`]. It stops at
//! the first terminal state. `Failed` and `Expired` become
//! [`ParallexError::JobFailed`]; `Succeeded` locates the result file, which
//! [`CompletionWaiter::decode`] then turns into per-page outputs.
//!
//! There is no overall deadline: a job that never leaves `Running` is polled
//! until the remote side expires it.

use super::decode::decode_results;
use super::tracker::ResourceTracker;
use crate::client::{Job, JobStatus, RemoteJobClient, RemoteResource, ResultHandle};
use crate::config::PollPolicy;
use crate::error::ParallexError;
use crate::output::PageOutput;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source of delays between polls.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    /// `polls` counts the status answers seen so far.
    Running { polls: u32 },
    Succeeded,
    Failed { reason: String },
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed { .. } | JobState::Expired
        )
    }

    /// Apply one status answer. Terminal states absorb everything.
    pub fn on_status(self, status: JobStatus) -> JobState {
        if self.is_terminal() {
            return self;
        }
        let polls = match self {
            JobState::Running { polls } => polls + 1,
            _ => 1,
        };
        match status {
            JobStatus::Running => JobState::Running { polls },
            JobStatus::Succeeded => JobState::Succeeded,
            JobStatus::Failed { reason } => JobState::Failed { reason },
            JobStatus::Expired => JobState::Expired,
        }
    }
}

/// Polls jobs to completion and decodes their results.
pub struct CompletionWaiter {
    client: Arc<dyn RemoteJobClient>,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

impl CompletionWaiter {
    pub fn new(client: Arc<dyn RemoteJobClient>, policy: PollPolicy) -> Self {
        Self {
            client,
            policy,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Poll `job` until it reaches a terminal state.
    ///
    /// On success the result file is recorded in `tracker` before the handle
    /// is returned.
    pub async fn await_completion(
        &self,
        job: &Job,
        tracker: &ResourceTracker,
    ) -> Result<ResultHandle, ParallexError> {
        let mut state = JobState::Submitted;
        let mut interval = self.policy.initial_interval;

        loop {
            let status = self.client.poll_status(&job.id).await?;
            state = state.on_status(status);

            match &state {
                JobState::Succeeded => break,
                JobState::Failed { reason } => {
                    return Err(ParallexError::JobFailed {
                        job_id: job.id.clone(),
                        trace_id: job.trace_id,
                        reason: reason.clone(),
                    });
                }
                JobState::Expired => {
                    return Err(ParallexError::JobFailed {
                        job_id: job.id.clone(),
                        trace_id: job.trace_id,
                        reason: "job expired before completing".to_string(),
                    });
                }
                JobState::Submitted | JobState::Running { .. } => {
                    debug!("Job {} still running; next poll in {:?}", job.id, interval);
                    self.clock.sleep(interval).await;
                    interval = self.policy.next_interval(interval);
                }
            }
        }

        let handle = self.client.fetch_result(&job.id).await?;
        tracker.track(RemoteResource::File(handle.file_id.clone()));
        info!("Job {} completed - trace {}", job.id, job.trace_id);
        Ok(handle)
    }

    /// Read a result payload and split it into one output per page.
    ///
    /// `expected_pages` are the pages packed into the job's unit; any missing
    /// or foreign page is a decode error.
    pub async fn decode(
        &self,
        job: &Job,
        handle: &ResultHandle,
        expected_pages: &[usize],
    ) -> Result<Vec<PageOutput>, ParallexError> {
        let payload = self.client.read(handle).await?;
        decode_results(&job.id, job.trace_id, &payload, expected_pages)
    }
}
