//! PDF rasterisation: render every page to a PNG file via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! Pages are scaled by `dpi / 72` and then capped so the longest edge stays
//! within `max_rendered_pixels`; an A0 poster at 150 DPI would otherwise
//! produce a 12,000 × 17,000 px image.

use super::input::RawFile;
use super::pack::PageArtifact;
use crate::config::ParallexConfig;
use crate::error::ParallexError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable naming a pdfium shared library or its directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Render settings lifted out of [`ParallexConfig`] so they can cross into
/// the blocking task.
#[derive(Debug, Clone)]
struct RenderSettings {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
}

/// Rasterise every page of `raw` into `out_dir` and return one artifact per
/// page, in page order.
///
/// An empty document is [`ParallexError::EmptyDocument`].
pub async fn render_pages(
    raw: &RawFile,
    out_dir: &Path,
    config: &ParallexConfig,
) -> Result<Vec<PageArtifact>, ParallexError> {
    let pages_dir = out_dir.join("pages");
    tokio::fs::create_dir_all(&pages_dir)
        .await
        .map_err(|e| ParallexError::io(&pages_dir, e))?;

    let pdf_path = raw.path.clone();
    let trace_id = raw.trace_id;
    let settings = RenderSettings {
        dpi: config.dpi,
        max_pixels: config.max_rendered_pixels,
        password: config.password.clone(),
    };

    let paths = tokio::task::spawn_blocking(move || {
        render_pages_blocking(&pdf_path, &pages_dir, trace_id, &settings)
    })
    .await
    .map_err(|e| ParallexError::Internal(format!("Render task panicked: {}", e)))??;

    if paths.is_empty() {
        return Err(ParallexError::EmptyDocument {
            path: raw.path.clone(),
        });
    }

    let prompt: Arc<str> = Arc::from(config.prompt());
    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(idx, path)| PageArtifact {
            trace_id,
            page_number: idx + 1,
            path,
            prompt_text: Arc::clone(&prompt),
        })
        .collect())
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, ParallexError> {
    let bindings = match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        Some(configured) => {
            let configured = PathBuf::from(configured);
            let lib = if configured.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&configured)
            } else {
                configured
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib).map_err(|e| {
                ParallexError::PdfiumBindingFailed(format!("{}: {}", lib.display(), e))
            })?
        }
        None => Pdfium::bind_to_system_library()
            .map_err(|e| ParallexError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering. Returns the PNG paths in page
/// order.
fn render_pages_blocking(
    pdf_path: &Path,
    pages_dir: &Path,
    trace_id: Uuid,
    settings: &RenderSettings,
) -> Result<Vec<PathBuf>, ParallexError> {
    let pdfium = bind_pdfium()?;
    let password = settings.password.as_deref();

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                ParallexError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                ParallexError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            ParallexError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    info!("Trace {}: PDF loaded, {} pages", trace_id, pages.len());

    let max_pixels = settings.max_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / 72.0)
        .set_maximum_width(max_pixels)
        .set_maximum_height(max_pixels);

    let mut paths = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let failed = |detail: String| ParallexError::RasterisationFailed {
            page: page_number,
            detail,
        };

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{:?}", e)))?;
        let image = bitmap.as_image();

        let path = pages_dir.join(format!("{trace_id}-page-{page_number}.png"));
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| failed(format!("PNG encode to {}: {}", path.display(), e)))?;

        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );
        paths.push(path);
    }

    Ok(paths)
}
