//! Error types for the parallex library.
//!
//! Every failure in the batch pipeline is fatal: a run either produces a
//! complete, ordered document or it produces nothing. A silently missing page
//! would corrupt the document order downstream, so there is no per-page
//! "partial success" type.
//!
//! Remote-side variants follow the pipeline's taxonomy:
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | [`ParallexError::Transport`]  | network/auth failure talking to the remote API |
//! | [`ParallexError::Submission`] | the remote system rejects a job |
//! | [`ParallexError::JobFailed`]  | a job reaches `Failed`, `Expired` or `Cancelled` |
//! | [`ParallexError::Decode`]     | a result payload is malformed or incomplete |
//! | [`ParallexError::InvalidConfig`] | bad limits, unset model, oversized artifact |

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the parallex library.
#[derive(Debug, Error)]
pub enum ParallexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document has no pages, so there is nothing to submit.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Network or authentication failure talking to the remote API.
    #[error("Remote API transport error during {operation}: {detail}")]
    Transport { operation: String, detail: String },

    /// The remote system refused to create a job for an uploaded file.
    #[error("Job submission rejected for file {file_id} (trace {trace_id}): {detail}")]
    Submission {
        file_id: String,
        trace_id: Uuid,
        detail: String,
    },

    /// A job reached a terminal status other than success.
    #[error("Batch job {job_id} (trace {trace_id}) did not succeed: {reason}")]
    JobFailed {
        job_id: String,
        trace_id: Uuid,
        reason: String,
    },

    /// A completed job's result payload could not be turned into pages.
    #[error("Could not decode results of job {job_id}: {detail}")]
    Decode { job_id: String, detail: String },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// Two outputs claim the same page; an upstream stage is broken.
    #[error("Page {page} of trace {trace_id} was produced more than once")]
    DuplicatePage { trace_id: Uuid, page: usize },

    /// Outputs do not cover the contiguous range 1..=N.
    #[error("Trace {trace_id} is missing pages {missing:?}")]
    MissingPages { trace_id: Uuid, missing: Vec<usize> },

    /// An output names a page the document does not have.
    #[error("Page {page} of trace {trace_id} is outside the document's {page_count} pages")]
    PageOutOfRange {
        trace_id: Uuid,
        page: usize,
        page_count: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, write or read a working file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation or run-time configuration check failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParallexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ParallexError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(operation: impl Into<String>, detail: impl ToString) -> Self {
        ParallexError::Transport {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// `true` for failures raised by the remote side of the pipeline.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ParallexError::Transport { .. }
                | ParallexError::Submission { .. }
                | ParallexError::JobFailed { .. }
                | ParallexError::Decode { .. }
        )
    }
}
