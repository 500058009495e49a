//! PDF access through pdfium: page counts, rasterisation, and the native
//! text layer.
//!
//! pdfium keeps thread-local state and is not async-safe, so every entry
//! point here is blocking and the async wrappers hop onto
//! `spawn_blocking`. Rendering sits behind [`PageRenderer`] so the vision and
//! OCR stages can be driven without a pdfium library in tests.

use crate::config::ExtractionConfig;
use crate::document::Document;
use crate::error::{PageError, Pdf2FactsError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Rasterises one page of a document.
pub trait PageRenderer: Send + Sync {
    /// Render 1-based `page` of `document`.
    fn render_page(&self, document: &Document, page: usize) -> Result<DynamicImage, PageError>;
}

/// Run a renderer on the blocking pool.
pub async fn render_blocking(
    renderer: Arc<dyn PageRenderer>,
    document: Document,
    page: usize,
) -> Result<DynamicImage, PageError> {
    tokio::task::spawn_blocking(move || renderer.render_page(&document, page))
        .await
        .map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("render task panicked: {e}"),
        })?
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` (file or directory) first, then the
/// system library.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2FactsError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(&p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(lib)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| Pdf2FactsError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError, source_label: &str, password: Option<&str>) -> Pdf2FactsError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            Pdf2FactsError::WrongPassword {
                source_label: source_label.to_string(),
            }
        } else {
            Pdf2FactsError::PasswordRequired {
                source_label: source_label.to_string(),
            }
        }
    } else {
        Pdf2FactsError::CorruptPdf {
            source_label: source_label.to_string(),
            detail: err_str,
        }
    }
}

/// Count pages with pdfium, off the async runtime.
pub async fn page_count(
    bytes: Arc<[u8]>,
    source_label: String,
    password: Option<String>,
) -> Result<usize, Pdf2FactsError> {
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password.as_deref())
            .map_err(|e| map_load_error(e, &source_label, password.as_deref()))?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| Pdf2FactsError::Internal(format!("Page-count task panicked: {}", e)))?
}

/// Renderer backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
        }
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_page(&self, document: &Document, page: usize) -> Result<DynamicImage, PageError> {
        let failed = |detail: String| PageError::RenderFailed { page, detail };

        let pdfium = bind_pdfium().map_err(|e| failed(e.to_string()))?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document.bytes(), self.password.as_deref())
            .map_err(|e| failed(format!("{e:?}")))?;

        let pages = pdf.pages();
        if page == 0 || page > pages.len() as usize {
            return Err(failed(format!("out of range (document has {} pages)", pages.len())));
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let pdf_page = pages
            .get((page - 1) as u16)
            .map_err(|e| failed(format!("{e:?}")))?;
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{e:?}")))?;

        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", page, image.width(), image.height());
        Ok(image)
    }
}

/// Read pdfium's native text layer for the requested 1-based pages.
///
/// Returns one result per requested page, in request order. A document that
/// cannot be opened fails every page.
pub fn text_layer_blocking(
    bytes: &[u8],
    password: Option<&str>,
    pages: &[usize],
) -> Vec<(usize, Result<String, String>)> {
    let opened = bind_pdfium().map_err(|e| e.to_string()).and_then(|pdfium| {
        let texts = {
            let pdf = pdfium
                .load_pdf_from_byte_slice(bytes, password)
                .map_err(|e| format!("{e:?}"))?;
            let doc_pages = pdf.pages();
            let total = doc_pages.len() as usize;
            pages
                .iter()
                .map(|&page| {
                    if page == 0 || page > total {
                        return (page, Err(format!("out of range (document has {total} pages)")));
                    }
                    let text = doc_pages
                        .get((page - 1) as u16)
                        .map_err(|e| format!("{e:?}"))
                        .and_then(|p| p.text().map(|t| t.all()).map_err(|e| format!("{e:?}")));
                    (page, text)
                })
                .collect::<Vec<_>>()
        };
        Ok(texts)
    });

    match opened {
        Ok(texts) => texts,
        Err(detail) => pages.iter().map(|&p| (p, Err(detail.clone()))).collect(),
    }
}
