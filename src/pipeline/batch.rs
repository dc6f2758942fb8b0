//! The remote half of a run: pack → upload → submit → wait → decode →
//! aggregate, with cleanup on every exit path.

use super::aggregate::{aggregate, SourceInfo};
use super::pack::{BatchPacker, PageArtifact};
use super::schedule::run_bounded;
use super::tracker::{CleanupReport, ResourceTracker};
use super::wait::{Clock, CompletionWaiter};
use crate::client::{Job, RemoteJobClient, RemoteResource};
use crate::config::{ParallexConfig, PostProcessHook};
use crate::error::ParallexError;
use crate::output::{OrderedDocument, PageOutput};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A submitted job and the pages its unit carries.
struct SubmittedJob {
    job: Job,
    page_numbers: Vec<usize>,
}

/// Drives page artifacts through the remote batch service.
pub struct BatchPipeline {
    client: Arc<dyn RemoteJobClient>,
    packer: BatchPacker,
    waiter: CompletionWaiter,
    concurrency: usize,
    progress: ProgressCallback,
    post_process: Option<PostProcessHook>,
}

impl BatchPipeline {
    /// Build a pipeline over `client` from `config`.
    ///
    /// Fails when the config has no model or an unusable limit.
    pub fn new(
        client: Arc<dyn RemoteJobClient>,
        config: &ParallexConfig,
    ) -> Result<Self, ParallexError> {
        config.validate()?;
        Ok(Self {
            packer: BatchPacker::from_config(config)?,
            waiter: CompletionWaiter::new(Arc::clone(&client), config.poll),
            client,
            concurrency: config.concurrency,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            post_process: config.post_process.clone(),
        })
    }

    /// Replace the clock used between status polls.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.waiter = self.waiter.with_clock(clock);
        self
    }

    /// Turn `artifacts` into an ordered document.
    ///
    /// Unit files are written under `work_dir`. Every remote resource the
    /// run creates is deleted before this returns, whatever the outcome; a
    /// failed deletion is logged and never replaces the run's result. A
    /// panic inside the run (a post-process hook, say) is returned as
    /// [`ParallexError::Internal`] after cleanup.
    ///
    /// If this future is dropped before it finishes, cleanup of whatever
    /// was tracked so far is spawned onto the current tokio runtime, which
    /// must stay alive long enough for the deletes to go out.
    pub async fn process(
        &self,
        source: SourceInfo,
        artifacts: Vec<PageArtifact>,
        work_dir: &Path,
    ) -> Result<OrderedDocument, ParallexError> {
        let tracker = Arc::new(ResourceTracker::new());
        let _guard = CleanupGuard {
            tracker: Arc::clone(&tracker),
            client: Arc::clone(&self.client),
            trace_id: source.trace_id,
        };
        let total_pages = artifacts.len();

        let result = AssertUnwindSafe(self.execute(&source, &artifacts, work_dir, &tracker))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ParallexError::Internal(format!(
                    "run panicked: {}",
                    panic_message(&*payload)
                )))
            });

        match &result {
            Ok(doc) => info!(
                "Trace {}: {} pages in {} job(s), {}ms",
                source.trace_id, total_pages, doc.stats.upload_units, doc.stats.batch_duration_ms
            ),
            Err(e) => error!("Trace {} failed: {}", source.trace_id, e),
        }
        self.progress.on_run_complete(total_pages, result.is_ok());

        let report = tracker.cleanup_all(self.client.as_ref()).await;
        log_cleanup(source.trace_id, &report);

        result
    }

    async fn execute(
        &self,
        source: &SourceInfo,
        artifacts: &[PageArtifact],
        work_dir: &Path,
        tracker: &ResourceTracker,
    ) -> Result<OrderedDocument, ParallexError> {
        let start = Instant::now();
        let limit = self.concurrency;

        let units = self.packer.pack(artifacts, work_dir).await?;
        info!(
            "Trace {}: packed {} pages into {} unit(s)",
            source.trace_id,
            artifacts.len(),
            units.len()
        );
        self.progress.on_run_start(artifacts.len(), units.len());

        // Tasks are boxed so the run future stays `Send` for spawning callers.
        let uploads: Vec<_> = units
            .iter()
            .map(|unit| {
                async move {
                    let file = self.client.upload(&unit.path).await?;
                    tracker.track(RemoteResource::File(file.id.clone()));
                    debug!(
                        "Uploaded unit {} ({} bytes) as {}",
                        unit.sequence_index, unit.size_bytes, file.id
                    );
                    Ok::<_, ParallexError>(file)
                }
                .boxed()
            })
            .collect();
        let files = run_bounded(uploads, limit).await?;

        let submissions: Vec<_> = units
            .iter()
            .zip(&files)
            .map(|(unit, file)| {
                async move {
                    let job = self.client.submit_job(&file.id, unit.trace_id).await?;
                    tracker.track(RemoteResource::Job(job.id.clone()));
                    info!(
                        "Submitted job {} for unit {} ({} pages)",
                        job.id,
                        unit.sequence_index,
                        unit.page_numbers.len()
                    );
                    self.progress
                        .on_job_submitted(&job.id, unit.page_numbers.len());
                    Ok::<_, ParallexError>(SubmittedJob {
                        job,
                        page_numbers: unit.page_numbers.clone(),
                    })
                }
                .boxed()
            })
            .collect();
        let jobs = run_bounded(submissions, limit).await?;

        let completions: Vec<_> = jobs
            .iter()
            .map(|submitted| {
                async move {
                    let outcome = self.complete(submitted, tracker).await;
                    match &outcome {
                        Ok(pages) => self.progress.on_job_complete(&submitted.job.id, pages.len()),
                        Err(e) => self
                            .progress
                            .on_job_error(&submitted.job.id, &e.to_string()),
                    }
                    outcome
                }
                .boxed()
            })
            .collect();
        let groups = run_bounded(completions, limit).await?;

        let mut document = aggregate(source, groups, artifacts.len())?;
        document.stats.upload_units = units.len();
        document.stats.batch_duration_ms = start.elapsed().as_millis() as u64;
        document.stats.total_duration_ms =
            source.render_duration_ms + document.stats.batch_duration_ms;

        if let Some(hook) = &self.post_process {
            hook(&document);
        }

        Ok(document)
    }

    async fn complete(
        &self,
        submitted: &SubmittedJob,
        tracker: &ResourceTracker,
    ) -> Result<Vec<PageOutput>, ParallexError> {
        let handle = self
            .waiter
            .await_completion(&submitted.job, tracker)
            .await?;
        self.waiter
            .decode(&submitted.job, &handle, &submitted.page_numbers)
            .await
    }
}

/// Spawns cleanup of whatever is still tracked when the run future is
/// dropped mid-flight. A finished run has drained the tracker already.
struct CleanupGuard {
    tracker: Arc<ResourceTracker>,
    client: Arc<dyn RemoteJobClient>,
    trace_id: Uuid,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.tracker.is_empty() {
            return;
        }
        let trace_id = self.trace_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Trace {}: run dropped, deleting {} remote resource(s) in the background",
                    trace_id,
                    self.tracker.len()
                );
                let tracker = Arc::clone(&self.tracker);
                let client = Arc::clone(&self.client);
                handle.spawn(async move {
                    let report = tracker.cleanup_all(client.as_ref()).await;
                    log_cleanup(trace_id, &report);
                });
            }
            Err(_) => warn!(
                "Trace {}: run dropped outside a runtime, {} remote resource(s) left behind: {:?}",
                trace_id,
                self.tracker.len(),
                self.tracker.tracked()
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn log_cleanup(trace_id: Uuid, report: &CleanupReport) {
    if report.is_clean() {
        debug!(
            "Trace {}: cleaned up {} remote resource(s)",
            trace_id, report.deleted
        );
    } else {
        warn!(
            "Trace {}: {} of {} remote resource(s) could not be deleted",
            trace_id,
            report.failed.len(),
            report.attempted
        );
    }
}
