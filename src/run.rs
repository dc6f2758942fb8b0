//! Caller-facing entry points.
//!
//! [`parallex`] owns the whole run: it makes a temporary working directory,
//! resolves the input, renders pages and hands them to a
//! [`BatchPipeline`]. The directory and every remote resource are gone by
//! the time it returns, on success and on failure alike.

use crate::client::{AzureBatchClient, RemoteJobClient};
use crate::config::ParallexConfig;
use crate::error::ParallexError;
use crate::output::OrderedDocument;
use crate::pipeline::aggregate::SourceInfo;
use crate::pipeline::batch::BatchPipeline;
use crate::pipeline::{input, render};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{error, info};

/// Convert a PDF file or URL into an ordered document.
///
/// # Arguments
/// * `pdf_source` — local file path or HTTP/HTTPS URL to a PDF
/// * `config` — run configuration; `config.model` must be set
///
/// # Errors
/// Any fatal error from the pipeline. Remote cleanup has already run when
/// the error is returned; cleanup failures are logged, not returned.
///
/// # Cancellation
/// Dropping the returned future (a `tokio::time::timeout`, say) spawns
/// deletion of everything created so far onto the current runtime. A
/// request that was mid-flight at the drop may still create a resource
/// nobody recorded.
pub async fn parallex(
    pdf_source: impl AsRef<str>,
    config: &ParallexConfig,
) -> Result<OrderedDocument, ParallexError> {
    let pdf_source = pdf_source.as_ref();
    let result = run(pdf_source, config).await;
    if let Err(ref e) = result {
        error!("Run for '{}' failed: {}", pdf_source, e);
    }
    result
}

/// Blocking wrapper around [`parallex`] that builds its own tokio runtime.
///
/// Must not be called from inside an async context.
pub fn parallex_sync(
    pdf_source: impl AsRef<str>,
    config: &ParallexConfig,
) -> Result<OrderedDocument, ParallexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ParallexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parallex(pdf_source, config))
}

async fn run(pdf_source: &str, config: &ParallexConfig) -> Result<OrderedDocument, ParallexError> {
    let total_start = Instant::now();

    // Config problems surface before any download or rendering.
    let client = resolve_client(config)?;
    let pipeline = BatchPipeline::new(client, config)?;

    let work_dir = TempDir::new().map_err(|e| ParallexError::io(std::env::temp_dir(), e))?;

    let raw = input::resolve_input(pdf_source, work_dir.path(), config.download_timeout_secs).await?;

    let render_start = Instant::now();
    let artifacts = render::render_pages(&raw, work_dir.path(), config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Trace {}: rendered {} pages in {}ms",
        raw.trace_id,
        artifacts.len(),
        render_duration_ms
    );

    let source = SourceInfo {
        trace_id: raw.trace_id,
        file_name: raw.given_name,
        source_url: raw.source,
        render_duration_ms,
    };
    let mut document = pipeline.process(source, artifacts, work_dir.path()).await?;
    document.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(document)
}

fn resolve_client(config: &ParallexConfig) -> Result<Arc<dyn RemoteJobClient>, ParallexError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }
    Ok(Arc::new(AzureBatchClient::from_env()?))
}
