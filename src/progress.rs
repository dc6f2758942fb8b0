//! Progress-callback trait for run and job events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ParallexConfigBuilder::progress_callback`] to observe a
//! run as it packs pages, submits jobs and waits for them.
//!
//! # Example
//!
//! ```rust
//! use parallex::{BatchProgressCallback, ParallexConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for PageCounter {
//!     fn on_job_complete(&self, _job_id: &str, pages: usize) {
//!         self.done.fetch_add(pages, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ParallexConfig::builder()
//!     .progress_callback(Arc::new(PageCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch pipeline as a run progresses.
///
/// Jobs are submitted and awaited concurrently, so the per-job methods may
/// be called from several tasks at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once the pages are packed, before anything is uploaded.
    ///
    /// # Arguments
    /// * `total_pages` — pages in the run
    /// * `total_jobs`  — upload units, one remote job each
    fn on_run_start(&self, total_pages: usize, total_jobs: usize) {
        let _ = (total_pages, total_jobs);
    }

    /// Called when the remote system accepts a job.
    fn on_job_submitted(&self, job_id: &str, pages: usize) {
        let _ = (job_id, pages);
    }

    /// Called when a job's results have been decoded.
    fn on_job_complete(&self, job_id: &str, pages: usize) {
        let _ = (job_id, pages);
    }

    /// Called when a job fails terminally or its results cannot be decoded.
    fn on_job_error(&self, job_id: &str, error: &str) {
        let _ = (job_id, error);
    }

    /// Called once at the end of the run, before remote cleanup.
    fn on_run_complete(&self, total_pages: usize, success: bool) {
        let _ = (total_pages, success);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ParallexConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        submitted: AtomicUsize,
        pages_done: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_job_submitted(&self, _job_id: &str, _pages: usize) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _job_id: &str, pages: usize) {
            self.pages_done.fetch_add(pages, Ordering::SeqCst);
        }

        fn on_job_error(&self, _job_id: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5, 2);
        cb.on_job_submitted("b1", 3);
        cb.on_job_complete("b1", 3);
        cb.on_job_error("b2", "expired");
        cb.on_run_complete(5, false);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_job_submitted("b1", 3);
        tracker.on_job_submitted("b2", 2);
        tracker.on_job_complete("b1", 3);
        tracker.on_job_error("b2", "failed");

        assert_eq!(tracker.submitted.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.pages_done.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(10, 1);
        cb.on_job_complete("b1", 10);
    }
}
