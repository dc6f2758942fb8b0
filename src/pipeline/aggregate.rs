//! Merging per-job outputs into one ordered document.

use crate::error::ParallexError;
use crate::output::{OrderedDocument, PageOutput, RunStats};
use uuid::Uuid;

/// Identity of the document being assembled.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub trace_id: Uuid,
    pub file_name: String,
    /// Path or URL the caller supplied.
    pub source_url: String,
    /// Time spent turning the input into page artifacts, carried into stats.
    pub render_duration_ms: u64,
}

/// Flatten `groups` and order them by page number.
///
/// The result must hold every page `1..=expected_pages` exactly once: a
/// repeated page is [`ParallexError::DuplicatePage`], a page past the end
/// is [`ParallexError::PageOutOfRange`] and a gap is
/// [`ParallexError::MissingPages`].
pub fn aggregate(
    source: &SourceInfo,
    groups: Vec<Vec<PageOutput>>,
    expected_pages: usize,
) -> Result<OrderedDocument, ParallexError> {
    let mut pages: Vec<PageOutput> = groups.into_iter().flatten().collect();
    pages.sort_by_key(|p| p.page_number);

    for pair in pages.windows(2) {
        if pair[0].page_number == pair[1].page_number {
            return Err(ParallexError::DuplicatePage {
                trace_id: source.trace_id,
                page: pair[0].page_number,
            });
        }
    }

    if let Some(stray) = pages
        .iter()
        .find(|p| p.page_number == 0 || p.page_number > expected_pages)
    {
        return Err(ParallexError::PageOutOfRange {
            trace_id: source.trace_id,
            page: stray.page_number,
            page_count: expected_pages,
        });
    }

    if pages.len() != expected_pages {
        let mut present = pages.iter().map(|p| p.page_number).peekable();
        let mut missing = Vec::new();
        for n in 1..=expected_pages {
            if present.peek() == Some(&n) {
                present.next();
            } else {
                missing.push(n);
            }
        }
        return Err(ParallexError::MissingPages {
            trace_id: source.trace_id,
            missing,
        });
    }

    let stats = RunStats {
        total_pages: pages.len(),
        total_input_tokens: pages.iter().map(|p| p.response.prompt_tokens).sum(),
        total_output_tokens: pages.iter().map(|p| p.response.completion_tokens).sum(),
        render_duration_ms: source.render_duration_ms,
        ..RunStats::default()
    };

    Ok(OrderedDocument {
        file_name: source.file_name.clone(),
        source_url: source.source_url.clone(),
        trace_id: source.trace_id,
        pages,
        stats,
    })
}
