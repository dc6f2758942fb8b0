//! Prompt text sent alongside each page image.
//!
//! Callers can override the default via
//! [`crate::config::ParallexConfig::prompt_text`]; the constant here is used
//! only when no override is provided.

/// Default prompt for converting one PDF page image to Markdown.
pub const DEFAULT_PROMPT: &str = r#"Convert the following PDF page to markdown.
Return only the markdown with no explanation text.
Leave out any page numbers and redundant headers or footers.
Do not include any code blocks (e.g. "```markdown" or "```") in the response.
If unable to parse, return an empty string."#;
