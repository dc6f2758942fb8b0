//! # parallex
//!
//! Convert PDF documents to Markdown by fanning pages out to a remote batch
//! inference service and gathering the answers back in document order.
//!
//! ## Why batch jobs?
//!
//! Synchronous vision calls are rate-limited per request. Batch endpoints
//! accept one large line-delimited file per job and are cheaper per token,
//! so a long document becomes a handful of jobs instead of hundreds of
//! calls. The cost is bookkeeping: the pages must be packed under the
//! service's upload ceiling, jobs polled until they finish, results matched
//! back to their pages, and every remote file deleted afterwards.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL; mint trace id
//!  ├─ 2. Render    rasterise pages to PNG via pdfium (spawn_blocking)
//!  ├─ 3. Pack      page requests → size-bounded JSONL upload units
//!  ├─ 4. Upload    ┐
//!  ├─ 5. Submit    ├ bounded concurrency, every remote resource tracked
//!  ├─ 6. Wait      ┘ poll with backoff, decode result payloads
//!  ├─ 7. Order     merge pages, check 1..=N coverage, run post-process hook
//!  └─ 8. Cleanup   delete every tracked file and job, always
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parallex::{parallex, PageSeparator, ParallexConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials from AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_API_KEY
//!     let config = ParallexConfig::builder().model("gpt-4o-batch").build()?;
//!     let document = parallex("document.pdf", &config).await?;
//!     println!("{}", document.to_markdown(&PageSeparator::None));
//!     eprintln!("{} pages in {} job(s)",
//!         document.stats.total_pages,
//!         document.stats.upload_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `parallex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! parallex = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{
    AzureBatchClient, Job, JobStatus, RemoteFileHandle, RemoteJobClient, RemoteResource,
    ResultHandle,
};
pub use config::{
    BatchGranularity, PageSeparator, ParallexConfig, ParallexConfigBuilder, PollPolicy,
    PostProcessHook,
};
pub use error::ParallexError;
pub use output::{OrderedDocument, PageOutput, ResponseMetadata, RunStats};
pub use pipeline::aggregate::SourceInfo;
pub use pipeline::batch::BatchPipeline;
pub use pipeline::pack::{PageArtifact, UploadUnit};
pub use pipeline::wait::{Clock, TokioClock};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{parallex, parallex_sync};
