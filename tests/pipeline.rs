//! Integration tests for the batch pipeline.
//!
//! `BatchPipeline` runs end-to-end against an in-memory `FakeClient` that
//! parses the uploaded request files, scripts job status sequences and
//! synthesises result payloads. Polling uses a manual clock, so nothing here
//! touches the network, pdfium or real time.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use parallex::pipeline::custom_id;
use parallex::{
    BatchGranularity, BatchPipeline, BatchProgressCallback, Clock, Job, JobStatus, PageArtifact,
    ParallexConfig, ParallexError, PollPolicy, RemoteFileHandle, RemoteJobClient, RemoteResource,
    ResultHandle, SourceInfo,
};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Records requested sleeps and yields instead of waiting.
#[derive(Default)]
struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

struct FakeJob {
    id: String,
    file_id: String,
    pages: Vec<usize>,
    polls: usize,
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    /// Uploaded file id → custom ids in file order.
    uploads: Vec<(String, Vec<String>)>,
    jobs: Vec<FakeJob>,
    outputs: Vec<(String, String)>,
    created: Vec<RemoteResource>,
    deleted: Vec<RemoteResource>,
    delete_calls: usize,
    submit_calls: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory batch service. Jobs are keyed by the pages they carry so
/// failure injection is deterministic under concurrency.
struct FakeClient {
    state: Mutex<FakeState>,
    /// `Running` answers before a job succeeds, by the job's first page.
    running_polls: fn(usize) -> usize,
    fail_upload_page: Option<usize>,
    reject_submit_page: Option<usize>,
    fail_job_page: Option<usize>,
    drop_result_page: Option<usize>,
    /// Refuse to delete the n-th delete call (0-based).
    refuse_delete_call: Option<usize>,
    upload_delay: Duration,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            running_polls: |_| 1,
            fail_upload_page: None,
            reject_submit_page: None,
            fail_job_page: None,
            drop_result_page: None,
            refuse_delete_call: None,
            upload_delay: Duration::ZERO,
        }
    }
}

impl FakeClient {
    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }

    fn pages_of(custom_ids: &[String]) -> Vec<usize> {
        custom_ids
            .iter()
            .map(|cid| custom_id::decode(cid).unwrap().1)
            .collect()
    }

    /// Page groups of every uploaded file, in upload order.
    fn uploaded_units(&self) -> Vec<Vec<usize>> {
        let state = self.state.lock().unwrap();
        state
            .uploads
            .iter()
            .map(|(_, cids)| Self::pages_of(cids))
            .collect()
    }

    fn created(&self) -> HashSet<RemoteResource> {
        self.state.lock().unwrap().created.iter().cloned().collect()
    }

    fn deleted(&self) -> HashSet<RemoteResource> {
        self.state.lock().unwrap().deleted.iter().cloned().collect()
    }
}

#[async_trait]
impl RemoteJobClient for FakeClient {
    async fn upload(&self, path: &Path) -> Result<RemoteFileHandle, ParallexError> {
        let text = tokio::fs::read_to_string(path).await.unwrap();
        let custom_ids: Vec<String> = text
            .lines()
            .map(|line| {
                let v: serde_json::Value = serde_json::from_str(line).unwrap();
                v["custom_id"].as_str().unwrap().to_string()
            })
            .collect();
        let pages = Self::pages_of(&custom_ids);

        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }
        tokio::time::sleep(self.upload_delay).await;
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        if self.fail_upload_page.is_some_and(|p| pages.contains(&p)) {
            return Err(ParallexError::Transport {
                operation: "upload".into(),
                detail: "HTTP 503".into(),
            });
        }

        let id = Self::next_id(&mut state, "file");
        state.uploads.push((id.clone(), custom_ids));
        state.created.push(RemoteResource::File(id.clone()));
        Ok(RemoteFileHandle {
            id,
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            purpose: "batch".into(),
            status: Some("processed".into()),
        })
    }

    async fn submit_job(&self, file_id: &str, trace_id: Uuid) -> Result<Job, ParallexError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        let pages = state
            .uploads
            .iter()
            .find(|(id, _)| id == file_id)
            .map(|(_, cids)| Self::pages_of(cids))
            .unwrap();

        if self.reject_submit_page.is_some_and(|p| pages.contains(&p)) {
            return Err(ParallexError::Submission {
                file_id: file_id.to_string(),
                trace_id,
                detail: "HTTP 400: invalid_file".into(),
            });
        }

        let id = Self::next_id(&mut state, "batch");
        state.jobs.push(FakeJob {
            id: id.clone(),
            file_id: file_id.to_string(),
            pages,
            polls: 0,
        });
        state.created.push(RemoteResource::Job(id.clone()));
        Ok(Job {
            id,
            trace_id,
            remote_file_id: file_id.to_string(),
        })
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, ParallexError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.iter_mut().find(|j| j.id == job_id).unwrap();
        job.polls += 1;
        let first_page = job.pages[0];

        if job.polls <= (self.running_polls)(first_page) {
            return Ok(JobStatus::Running);
        }
        if self.fail_job_page.is_some_and(|p| job.pages.contains(&p)) {
            return Ok(JobStatus::Failed {
                reason: "invalid_request: image could not be decoded".into(),
            });
        }
        Ok(JobStatus::Succeeded)
    }

    async fn fetch_result(&self, job_id: &str) -> Result<ResultHandle, ParallexError> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "output");
        state.outputs.push((id.clone(), job_id.to_string()));
        state.created.push(RemoteResource::File(id.clone()));
        Ok(ResultHandle {
            job_id: job_id.to_string(),
            file_id: id,
        })
    }

    async fn read(&self, handle: &ResultHandle) -> Result<Vec<u8>, ParallexError> {
        let state = self.state.lock().unwrap();
        let job = state.jobs.iter().find(|j| j.id == handle.job_id).unwrap();
        let (_, custom_ids) = state
            .uploads
            .iter()
            .find(|(id, _)| *id == job.file_id)
            .unwrap();

        // Results come back in reverse so decoding cannot rely on file order.
        let mut payload = String::new();
        for cid in custom_ids.iter().rev() {
            let page = custom_id::decode(cid).unwrap().1;
            if self.drop_result_page == Some(page) {
                continue;
            }
            let line = json!({
                "id": format!("req-{page}"),
                "custom_id": cid,
                "response": {
                    "status_code": 200,
                    "request_id": format!("rid-{page}"),
                    "body": {
                        "model": "gpt-4o-2024-08-06",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": format!("# Page {page}\n")},
                            "finish_reason": "stop"
                        }],
                        "usage": {"prompt_tokens": 1000, "completion_tokens": 50}
                    }
                },
                "error": null
            });
            payload.push_str(&line.to_string());
            payload.push('\n');
        }
        Ok(payload.into_bytes())
    }

    async fn delete(&self, resource: &RemoteResource) -> Result<(), ParallexError> {
        let mut state = self.state.lock().unwrap();
        let call = state.delete_calls;
        state.delete_calls += 1;
        if self.refuse_delete_call == Some(call) {
            return Err(ParallexError::Transport {
                operation: "delete".into(),
                detail: "HTTP 500".into(),
            });
        }
        state.deleted.push(resource.clone());
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn write_artifacts(
    dir: &Path,
    trace_id: Uuid,
    pages: &[usize],
    image_len: usize,
) -> Vec<PageArtifact> {
    let prompt: Arc<str> = Arc::from("Convert this page to markdown.");
    let mut artifacts = Vec::new();
    for &page in pages {
        let path = dir.join(format!("page-{page}.png"));
        tokio::fs::write(&path, vec![page as u8; image_len])
            .await
            .unwrap();
        artifacts.push(PageArtifact {
            trace_id,
            page_number: page,
            path,
            prompt_text: Arc::clone(&prompt),
        });
    }
    artifacts
}

fn source(trace_id: Uuid) -> SourceInfo {
    SourceInfo {
        trace_id,
        file_name: "report.pdf".into(),
        source_url: "https://example.com/report.pdf".into(),
        render_duration_ms: 0,
    }
}

fn base_config() -> parallex::ParallexConfigBuilder {
    ParallexConfig::builder()
        .model("gpt-4o-batch")
        .poll(PollPolicy::fixed(Duration::from_secs(1)))
}

fn pipeline(client: &Arc<FakeClient>, config: &ParallexConfig) -> BatchPipeline {
    BatchPipeline::new(Arc::clone(client) as Arc<dyn RemoteJobClient>, config)
        .unwrap()
        .with_clock(Arc::new(ManualClock::default()))
}

fn page_numbers(doc: &parallex::OrderedDocument) -> Vec<usize> {
    doc.pages.iter().map(|p| p.page_number).collect()
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_come_back_in_order_whatever_the_completion_order() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3, 4, 5, 6, 7], 64).await;

    // Later pages finish first.
    let client = Arc::new(FakeClient {
        running_polls: |first_page| 8 - first_page,
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .concurrency(3)
        .build()
        .unwrap();

    let doc = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(page_numbers(&doc), vec![1, 2, 3, 4, 5, 6, 7]);
    assert!(doc.pages.iter().all(|p| p.trace_id == trace));
    assert_eq!(doc.pages[3].content, "# Page 4\n");
    assert_eq!(doc.stats.upload_units, 7);
    assert_eq!(doc.stats.total_pages, 7);
    assert_eq!(doc.stats.total_input_tokens, 7000);
    assert_eq!(doc.file_name, "report.pdf");
    assert_eq!(
        doc.to_markdown(&config.page_separator),
        (1..=7)
            .map(|n| format!("# Page {n}"))
            .collect::<Vec<_>>()
            .join("\n\n")
            + "\n"
    );
}

#[tokio::test]
async fn units_follow_encounter_order_and_output_is_sorted() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[2, 1, 3], 32).await;

    // Every line has the same length: room for two lines, not three.
    let model = "gpt-4o-batch";
    let line_len = parallex::pipeline::pack::BatchPacker::new(model, u64::MAX)
        .encode_line(&artifacts[0], &[2u8; 32])
        .unwrap()
        .len() as u64
        + 1;
    let client = Arc::new(FakeClient::default());
    let config = base_config()
        .max_unit_bytes(2 * line_len - 1)
        .build()
        .unwrap();

    let doc = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    let mut units = client.uploaded_units();
    units.sort();
    assert_eq!(units, vec![vec![2, 1], vec![3]]);
    assert_eq!(page_numbers(&doc), vec![1, 2, 3]);
    assert_eq!(doc.stats.upload_units, 2);
}

#[tokio::test]
async fn whole_trace_granularity_fits_small_documents_into_one_job() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3, 4], 16).await;
    let client = Arc::new(FakeClient::default());
    let config = base_config().build().unwrap();

    let doc = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(client.uploaded_units(), vec![vec![1, 2, 3, 4]]);
    assert_eq!(page_numbers(&doc), vec![1, 2, 3, 4]);
}

// ── Cleanup ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_created_resource_is_deleted_on_success() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient::default());
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .build()
        .unwrap();

    pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    // Three inputs, three jobs, three result files.
    assert_eq!(client.created().len(), 9);
    assert_eq!(client.deleted(), client.created());
}

#[tokio::test]
async fn failed_job_fails_the_run_and_everything_is_cleaned_up() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient {
        fail_job_page: Some(2),
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .build()
        .unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    let failed_job = {
        let state = client.state.lock().unwrap();
        state
            .jobs
            .iter()
            .find(|j| j.pages == vec![2])
            .map(|j| j.id.clone())
            .unwrap()
    };
    match err {
        ParallexError::JobFailed {
            job_id, trace_id, ..
        } => {
            assert_eq!(job_id, failed_job);
            assert_eq!(trace_id, trace);
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert_eq!(client.deleted(), client.created());
    assert!(client.created().contains(&RemoteResource::Job(failed_job)));
}

#[tokio::test]
async fn cleanup_failure_never_masks_the_primary_error() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2], 16).await;
    let client = Arc::new(FakeClient {
        fail_job_page: Some(1),
        refuse_delete_call: Some(0),
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .build()
        .unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    assert!(matches!(err, ParallexError::JobFailed { .. }), "got {err:?}");
    let state = client.state.lock().unwrap();
    assert_eq!(state.delete_calls, state.created.len());
    assert_eq!(state.deleted.len(), state.created.len() - 1);
}

#[tokio::test]
async fn cleanup_failure_after_success_still_returns_the_document() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2], 16).await;
    let client = Arc::new(FakeClient {
        refuse_delete_call: Some(1),
        ..FakeClient::default()
    });
    let config = base_config().build().unwrap();

    let doc = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(page_numbers(&doc), vec![1, 2]);
    let state = client.state.lock().unwrap();
    assert_eq!(state.delete_calls, state.created.len());
}

#[tokio::test]
async fn panicking_hook_fails_the_run_after_cleanup() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2], 16).await;
    let client = Arc::new(FakeClient::default());
    let config = base_config()
        .post_process(Arc::new(|_: &parallex::OrderedDocument| {
            panic!("hook exploded");
        }))
        .build()
        .unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    match err {
        ParallexError::Internal(msg) => assert!(msg.contains("hook exploded"), "got: {msg}"),
        other => panic!("expected Internal, got {other:?}"),
    }
    // Input file, job and result file.
    assert_eq!(client.created().len(), 3);
    assert_eq!(client.deleted(), client.created());
}

#[tokio::test]
async fn dropped_run_still_deletes_what_it_created() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2], 16).await;
    // The job never leaves `Running`.
    let client = Arc::new(FakeClient {
        running_polls: |_| usize::MAX,
        ..FakeClient::default()
    });
    let config = base_config().build().unwrap();
    let pipeline = pipeline(&client, &config);

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.process(source(trace), artifacts, work.path()),
    )
    .await;
    assert!(outcome.is_err(), "run should still be waiting");
    assert_eq!(client.created().len(), 2);

    for _ in 0..100 {
        if client.deleted() == client.created() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(client.deleted(), client.created());
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn entry_point_future_is_send() {
    let config = base_config().build().unwrap();
    let run = parallex::parallex("report.pdf", &config);
    assert_send(&run);
}

#[tokio::test]
async fn process_can_run_on_a_spawned_task() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient::default());
    let config = base_config().build().unwrap();
    let pipeline = pipeline(&client, &config);

    let doc = tokio::spawn(async move {
        pipeline
            .process(source(trace), artifacts, work.path())
            .await
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(page_numbers(&doc), vec![1, 2, 3]);
    assert_eq!(client.deleted(), client.created());
}

#[tokio::test]
async fn upload_failure_stops_before_any_submission() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient {
        fail_upload_page: Some(3),
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .build()
        .unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    assert!(matches!(err, ParallexError::Transport { .. }), "got {err:?}");
    assert_eq!(client.state.lock().unwrap().submit_calls, 0);
    assert_eq!(client.deleted(), client.created());
}

#[tokio::test]
async fn rejected_submission_surfaces_and_uploads_are_deleted() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2], 16).await;
    let client = Arc::new(FakeClient {
        reject_submit_page: Some(1),
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .concurrency(1)
        .build()
        .unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    match err {
        ParallexError::Submission { trace_id, .. } => assert_eq!(trace_id, trace),
        other => panic!("expected Submission, got {other:?}"),
    }
    // With one slot, the rejection stops the second submission.
    assert_eq!(client.state.lock().unwrap().submit_calls, 1);
    assert_eq!(client.deleted(), client.created());
}

// ── Decoding ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn result_missing_a_page_is_a_decode_error() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient {
        drop_result_page: Some(2),
        ..FakeClient::default()
    });
    let config = base_config().build().unwrap();

    let err = pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap_err();

    assert!(matches!(err, ParallexError::Decode { .. }), "got {err:?}");
    assert!(err.to_string().contains("[2]"), "got: {err}");
    assert_eq!(client.deleted(), client.created());
}

// ── Concurrency, polling, hooks ──────────────────────────────────────────────

#[tokio::test]
async fn uploads_never_exceed_the_concurrency_limit() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3, 4, 5, 6, 7, 8], 16).await;
    let client = Arc::new(FakeClient {
        upload_delay: Duration::from_millis(10),
        ..FakeClient::default()
    });
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .concurrency(2)
        .build()
        .unwrap();

    pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(client.state.lock().unwrap().peak_in_flight, 2);
}

#[tokio::test]
async fn waiting_uses_the_poll_policy_between_running_answers() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1], 16).await;
    let client = Arc::new(FakeClient {
        running_polls: |_| 3,
        ..FakeClient::default()
    });
    let config = base_config()
        .poll(PollPolicy {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(20),
            multiplier: 1.5,
        })
        .build()
        .unwrap();
    let clock = Arc::new(ManualClock::default());

    BatchPipeline::new(Arc::clone(&client) as Arc<dyn RemoteJobClient>, &config)
        .unwrap()
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![
            Duration::from_secs(10),
            Duration::from_secs(15),
            Duration::from_secs(20),
        ]
    );
}

#[tokio::test]
async fn post_process_hook_receives_the_ordered_document() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[3, 1, 2], 16).await;
    let client = Arc::new(FakeClient::default());
    let seen: Arc<Mutex<Option<Vec<usize>>>> = Arc::new(Mutex::new(None));
    let seen_in_hook = Arc::clone(&seen);
    let config = base_config()
        .granularity(BatchGranularity::PerPage)
        .post_process(Arc::new(move |doc: &parallex::OrderedDocument| {
            *seen_in_hook.lock().unwrap() = Some(page_numbers(doc));
        }))
        .build()
        .unwrap();

    pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn hook_is_not_called_when_the_run_fails() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1], 16).await;
    let client = Arc::new(FakeClient {
        fail_job_page: Some(1),
        ..FakeClient::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_hook = Arc::clone(&calls);
    let config = base_config()
        .post_process(Arc::new(move |_: &parallex::OrderedDocument| {
            calls_in_hook.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    assert!(pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for EventLog {
    fn on_run_start(&self, total_pages: usize, total_jobs: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {total_pages}/{total_jobs}"));
    }
    fn on_job_submitted(&self, _job_id: &str, pages: usize) {
        self.events.lock().unwrap().push(format!("submitted {pages}"));
    }
    fn on_job_complete(&self, _job_id: &str, pages: usize) {
        self.events.lock().unwrap().push(format!("complete {pages}"));
    }
    fn on_job_error(&self, _job_id: &str, _error: &str) {
        self.events.lock().unwrap().push("error".into());
    }
    fn on_run_complete(&self, total_pages: usize, success: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {total_pages} {success}"));
    }
}

#[tokio::test]
async fn progress_events_cover_the_run() {
    let work = tempfile::tempdir().unwrap();
    let trace = Uuid::new_v4();
    let artifacts = write_artifacts(work.path(), trace, &[1, 2, 3], 16).await;
    let client = Arc::new(FakeClient::default());
    let log = Arc::new(EventLog::default());
    let config = base_config()
        .progress_callback(Arc::clone(&log) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();

    pipeline(&client, &config)
        .process(source(trace), artifacts, work.path())
        .await
        .unwrap();

    assert_eq!(
        *log.events.lock().unwrap(),
        vec!["start 3/1", "submitted 3", "complete 3", "done 3 true"]
    );
}

#[tokio::test]
async fn missing_model_is_rejected_before_anything_runs() {
    let client = Arc::new(FakeClient::default());
    let config = ParallexConfig::builder().build().unwrap();
    let err = BatchPipeline::new(client.clone() as Arc<dyn RemoteJobClient>, &config)
        .err()
        .unwrap();
    assert!(matches!(err, ParallexError::InvalidConfig(_)));
    assert!(client.created().is_empty());
}
