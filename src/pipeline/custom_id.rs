//! The custom identifier correlating a result line with its page.
//!
//! Format: `<trace_id><DELIMITER><page_number>.jsonl`. The trace id is a
//! hyphenated UUID and the page number is decimal, so neither can contain
//! [`DELIMITER`].

use uuid::Uuid;

/// Reserved token between the trace id and the page number.
pub const DELIMITER: &str = "--parallex--";

const SUFFIX: &str = ".jsonl";

/// Build the custom identifier for one page.
pub fn encode(trace_id: Uuid, page_number: usize) -> String {
    format!("{trace_id}{DELIMITER}{page_number}{SUFFIX}")
}

/// Split a custom identifier back into trace id and page number.
///
/// Returns a short description of what is wrong when the input does not
/// follow the format.
pub fn decode(custom_id: &str) -> Result<(Uuid, usize), String> {
    let body = custom_id.strip_suffix(SUFFIX).unwrap_or(custom_id);
    let (trace, page) = body
        .split_once(DELIMITER)
        .ok_or_else(|| format!("custom_id '{custom_id}' has no '{DELIMITER}' delimiter"))?;
    let trace_id = Uuid::parse_str(trace)
        .map_err(|e| format!("custom_id '{custom_id}' has an invalid trace id: {e}"))?;
    let page_number: usize = page
        .parse()
        .map_err(|_| format!("custom_id '{custom_id}' has an invalid page number '{page}'"))?;
    if page_number == 0 {
        return Err(format!("custom_id '{custom_id}' has page number 0"));
    }
    Ok((trace_id, page_number))
}
