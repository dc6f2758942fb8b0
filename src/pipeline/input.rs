//! Input resolution: normalise a user-supplied path or URL to a local PDF.
//!
//! URLs are downloaded into the run's working directory so the file lives
//! exactly as long as the run. Local files are used in place. Either way the
//! PDF magic bytes (`%PDF`) are checked before anything else touches the
//! file, and the run's trace id is minted here.

use crate::error::ParallexError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF on local disk, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    /// Identifies every artifact, request and output of this run.
    pub trace_id: Uuid,
    /// File name the document is reported under.
    pub given_name: String,
    /// The path or URL exactly as supplied.
    pub source: String,
    pub path: PathBuf,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local PDF under a fresh trace id.
///
/// URL inputs are downloaded into `work_dir` with a `timeout_secs` limit on
/// the whole transfer.
pub async fn resolve_input(
    input: &str,
    work_dir: &Path,
    timeout_secs: u64,
) -> Result<RawFile, ParallexError> {
    if input.trim().is_empty() {
        return Err(ParallexError::InvalidInput {
            input: input.to_string(),
        });
    }

    let trace_id = Uuid::new_v4();
    let (path, given_name) = if is_url(input) {
        download_url(input, work_dir, timeout_secs).await?
    } else {
        resolve_local(input)?
    };

    info!("Trace {}: resolved '{}' → {}", trace_id, input, path.display());
    Ok(RawFile {
        trace_id,
        given_name,
        source: input.to_string(),
        path,
    })
}

/// Validate a local file path: it must exist, be readable and start with
/// the PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<(PathBuf, String), ParallexError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(ParallexError::FileNotFound { path });
    }

    let mut magic = [0u8; 4];
    match std::fs::File::open(&path) {
        Ok(f) => {
            // Shorter than four bytes leaves zeros, which fail the check.
            let mut head = Vec::with_capacity(magic.len());
            f.take(magic.len() as u64)
                .read_to_end(&mut head)
                .map_err(|e| ParallexError::io(&path, e))?;
            magic[..head.len()].copy_from_slice(&head);
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ParallexError::PermissionDenied { path });
        }
        Err(e) => return Err(ParallexError::io(&path, e)),
    }
    if &magic != PDF_MAGIC {
        return Err(ParallexError::NotAPdf { path, magic });
    }

    let given_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());

    debug!("Resolved local PDF: {}", path.display());
    Ok((path, given_name))
}

/// Stream a URL into `work_dir` and return the local path and file name.
async fn download_url(
    url: &str,
    work_dir: &Path,
    timeout_secs: u64,
) -> Result<(PathBuf, String), ParallexError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| ParallexError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ParallexError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let given_name = filename_from_url(url);
    let file_path = work_dir.join(&given_name);
    let mut file = tokio::fs::File::create(&file_path)
        .await
        .map_err(|e| ParallexError::io(&file_path, e))?;

    let mut magic = [0u8; 4];
    let mut received = 0usize;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(classify)?;
        for (slot, byte) in magic.iter_mut().skip(received).zip(chunk.iter()) {
            *slot = *byte;
        }
        received += chunk.len();
        file.write_all(&chunk)
            .await
            .map_err(|e| ParallexError::io(&file_path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| ParallexError::io(&file_path, e))?;

    if &magic != PDF_MAGIC {
        return Err(ParallexError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("Downloaded {} bytes to: {}", received, file_path.display());
    Ok((file_path, given_name))
}

/// The last URL path segment when it looks like a file name, otherwise
/// `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/files/report.pdf?x=1"),
            "report.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/download"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://example.com/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_pdf_resolves_in_place_with_fresh_trace() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::File::create(&pdf)
            .unwrap()
            .write_all(b"%PDF-1.7\n%stub")
            .unwrap();
        let source = pdf.to_string_lossy().into_owned();

        let a = resolve_input(&source, dir.path(), 5).await.unwrap();
        let b = resolve_input(&source, dir.path(), 5).await.unwrap();

        assert_eq!(a.path, pdf);
        assert_eq!(a.given_name, "paper.pdf");
        assert_eq!(a.source, source);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input("/definitely/not/here.pdf", dir.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ParallexError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.pdf");
        std::fs::write(&txt, b"hello").unwrap();
        let err = resolve_input(&txt.to_string_lossy(), dir.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ParallexError::NotAPdf { magic, .. } if &magic == b"hell"));
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input("  ", dir.path(), 5).await.unwrap_err();
        assert!(matches!(err, ParallexError::InvalidInput { .. }));
    }
}
