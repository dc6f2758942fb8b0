//! Decoding a job's line-delimited result payload into page outputs.
//!
//! Every non-empty line must parse, carry a valid custom identifier for the
//! job's trace, report a successful response with message content, and name
//! one of the pages packed into the job. Each packed page must appear exactly
//! once. Anything else fails the whole job: skipping a line would silently
//! drop a page from the document.

use super::custom_id;
use crate::error::ParallexError;
use crate::output::{PageOutput, ResponseMetadata};
use serde::Deserialize;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Deserialize)]
struct ResultLine {
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    response: Option<LineResponse>,
    #[serde(default)]
    error: Option<LineError>,
}

#[derive(Deserialize)]
struct LineResponse {
    status_code: u16,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    body: Option<CompletionBody>,
}

#[derive(Deserialize)]
struct LineError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Decode the result payload of `job_id`.
///
/// Outputs come back in payload order; ordering is restored later by the
/// aggregator.
pub fn decode_results(
    job_id: &str,
    trace_id: Uuid,
    payload: &[u8],
    expected_pages: &[usize],
) -> Result<Vec<PageOutput>, ParallexError> {
    let fail = |detail: String| ParallexError::Decode {
        job_id: job_id.to_string(),
        detail,
    };

    let text = std::str::from_utf8(payload)
        .map_err(|e| fail(format!("result payload is not UTF-8: {e}")))?;

    let expected: BTreeSet<usize> = expected_pages.iter().copied().collect();
    let mut seen = BTreeSet::new();
    let mut outputs = Vec::with_capacity(expected.len());

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }

        let line: ResultLine = serde_json::from_str(raw)
            .map_err(|e| fail(format!("line {line_no}: malformed JSON: {e}")))?;

        let cid = line
            .custom_id
            .ok_or_else(|| fail(format!("line {line_no}: missing custom_id")))?;
        let (line_trace, page_number) =
            custom_id::decode(&cid).map_err(|e| fail(format!("line {line_no}: {e}")))?;

        if line_trace != trace_id {
            return Err(fail(format!(
                "line {line_no}: belongs to trace {line_trace}, expected {trace_id}"
            )));
        }
        if !expected.contains(&page_number) {
            return Err(fail(format!(
                "line {line_no}: page {page_number} was not submitted in this job"
            )));
        }
        if !seen.insert(page_number) {
            return Err(fail(format!("page {page_number} appears more than once")));
        }

        if let Some(err) = line.error {
            return Err(fail(format!(
                "page {page_number}: request failed: {}: {}",
                err.code.as_deref().unwrap_or("error"),
                err.message.as_deref().unwrap_or("")
            )));
        }

        let response = line
            .response
            .ok_or_else(|| fail(format!("page {page_number}: line has no response")))?;
        if !(200..300).contains(&response.status_code) {
            return Err(fail(format!(
                "page {page_number}: request returned HTTP {}",
                response.status_code
            )));
        }

        let body = response
            .body
            .ok_or_else(|| fail(format!("page {page_number}: response has no body")))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| fail(format!("page {page_number}: response has no choices")))?;
        let content = choice
            .message
            .content
            .ok_or_else(|| fail(format!("page {page_number}: response has no content")))?;
        let usage = body.usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        outputs.push(PageOutput {
            trace_id,
            page_number,
            content,
            response: ResponseMetadata {
                request_id: response.request_id,
                model: body.model,
                finish_reason: choice.finish_reason,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        });
    }

    let missing: Vec<usize> = expected.difference(&seen).copied().collect();
    if !missing.is_empty() {
        return Err(fail(format!("result payload is missing pages {missing:?}")));
    }

    Ok(outputs)
}
