//! Bookkeeping for remote resources created during a run.
//!
//! Every uploaded file, submitted job and result file is recorded the moment
//! it exists. [`ResourceTracker::cleanup_all`] deletes all of them once,
//! whether the run succeeded or not. Deletion failures are logged and
//! reported but never replace the run's own outcome.

use crate::client::{RemoteJobClient, RemoteResource};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub attempted: usize,
    pub deleted: usize,
    pub failed: Vec<(RemoteResource, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: Mutex<Vec<RemoteResource>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `resource`. Recording the same resource twice is a no-op.
    pub fn track(&self, resource: RemoteResource) {
        let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        if !resources.contains(&resource) {
            debug!("Tracking {}", resource);
            resources.push(resource);
        }
    }

    /// Snapshot of what is currently tracked, in recording order.
    pub fn tracked(&self) -> Vec<RemoteResource> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every tracked resource, attempting each one even after a
    /// failure. Jobs go first so nothing still running loses its input.
    ///
    /// The list is drained: a second call attempts nothing.
    pub async fn cleanup_all(&self, client: &dyn RemoteJobClient) -> CleanupReport {
        let drained: Vec<RemoteResource> = {
            let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *resources)
        };
        let (jobs, files): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|r| matches!(r, RemoteResource::Job(_)));

        let mut report = CleanupReport::default();
        for resource in jobs.into_iter().chain(files) {
            report.attempted += 1;
            match client.delete(&resource).await {
                Ok(()) => {
                    debug!("Deleted {}", resource);
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", resource, e);
                    report.failed.push((resource, e.to_string()));
                }
            }
        }
        report
    }
}
