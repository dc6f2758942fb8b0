//! Output types: per-page results and the final ordered document.

use crate::config::PageSeparator;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response metadata carried over from the remote result line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Remote request id, if the service reported one.
    pub request_id: Option<String>,
    /// Model that actually served the request.
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The model's output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutput {
    pub trace_id: Uuid,
    /// 1-indexed page number.
    pub page_number: usize,
    /// Markdown content returned by the model.
    pub content: String,
    pub response: ResponseMetadata,
}

/// Timing and token totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    /// Number of upload units, which equals the number of remote jobs.
    pub upload_units: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub batch_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The terminal artifact of a run: every page, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedDocument {
    /// File name the source was stored under.
    pub file_name: String,
    /// Path or URL the caller supplied.
    pub source_url: String,
    pub trace_id: Uuid,
    /// Sorted ascending by `page_number`, covering 1..=N with no gaps.
    pub pages: Vec<PageOutput>,
    pub stats: RunStats,
}

impl OrderedDocument {
    /// Join every page's content into one Markdown document.
    pub fn to_markdown(&self, separator: &PageSeparator) -> String {
        let mut out = String::new();
        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 {
                out.push_str(&separator.render(page.page_number));
            }
            out.push_str(page.content.trim_end());
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}
