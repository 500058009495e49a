//! Tier 3: rasterise the page and run the `tesseract` CLI over it.
//!
//! Only reached for pages the first two tiers left blank, typically scanned
//! slides or text flattened into images. The binary is invoked per page with
//! `tesseract <png> stdout -l <lang>`; a missing binary fails the tier once
//! for every remaining page instead of spawning a doomed process per page.

use super::{TextTier, TierOutput};
use crate::config::OcrConfig;
use crate::document::Document;
use crate::pipeline::encode::png_bytes;
use crate::pipeline::render::{render_blocking, PageRenderer};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// OCR through an external tesseract process.
#[derive(Clone)]
pub struct TesseractOcrTier {
    config: OcrConfig,
    renderer: Arc<dyn PageRenderer>,
}

enum OcrFailure {
    /// The binary is not installed; no point trying other pages.
    MissingBinary(String),
    Page(String),
}

impl TesseractOcrTier {
    pub fn new(config: OcrConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        Self { config, renderer }
    }

    async fn ocr_page(&self, document: &Document, page: usize) -> Result<String, OcrFailure> {
        let image = render_blocking(Arc::clone(&self.renderer), document.clone(), page)
            .await
            .map_err(|e| OcrFailure::Page(e.to_string()))?;
        let png = png_bytes(&image).map_err(|e| OcrFailure::Page(format!("PNG encode: {e}")))?;

        let tmp = tempfile::Builder::new()
            .prefix("pdf2facts-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrFailure::Page(format!("temp file: {e}")))?;
        tokio::fs::write(tmp.path(), &png)
            .await
            .map_err(|e| OcrFailure::Page(format!("temp file: {e}")))?;

        let output = Command::new(&self.config.binary)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.language)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrFailure::MissingBinary(format!(
                    "OCR binary '{}' not found on PATH",
                    self.config.binary
                )),
                _ => OcrFailure::Page(format!("spawning '{}': {e}", self.config.binary)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrFailure::Page(format!(
                "'{}' exited with {}: {}",
                self.config.binary,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR page {} → {} chars", page, text.trim().len());
        Ok(text)
    }
}

#[async_trait]
impl TextTier for TesseractOcrTier {
    fn name(&self) -> &str {
        "ocr"
    }

    async fn extract(&self, document: &Document, pages: &[usize]) -> TierOutput {
        let mut out = Vec::with_capacity(pages.len());
        for (i, &page) in pages.iter().enumerate() {
            match self.ocr_page(document, page).await {
                Ok(text) => out.push((page, Ok(text))),
                Err(OcrFailure::Page(detail)) => out.push((page, Err(detail))),
                Err(OcrFailure::MissingBinary(detail)) => {
                    warn!("{}; OCR tier skipped", detail);
                    out.extend(pages[i..].iter().map(|&p| (p, Err(detail.clone()))));
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BlankRenderer {
        calls: AtomicUsize,
    }

    impl PageRenderer for BlankRenderer {
        fn render_page(&self, _document: &Document, _page: usize) -> Result<DynamicImage, PageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                4,
                4,
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    struct FailingRenderer;

    impl PageRenderer for FailingRenderer {
        fn render_page(&self, _document: &Document, page: usize) -> Result<DynamicImage, PageError> {
            Err(PageError::RenderFailed {
                page,
                detail: "no pdfium".into(),
            })
        }
    }

    fn doc() -> Document {
        Document::from_bytes("scan.pdf", b"%PDF-1.7".to_vec(), 3)
    }

    #[tokio::test]
    async fn missing_binary_fails_remaining_pages_once() {
        let renderer = Arc::new(BlankRenderer {
            calls: AtomicUsize::new(0),
        });
        let tier = TesseractOcrTier::new(
            OcrConfig {
                enabled: true,
                binary: "pdf2facts-no-such-ocr-binary".into(),
                language: "eng".into(),
            },
            renderer.clone(),
        );

        let out = tier.extract(&doc(), &[1, 2, 3]).await;

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, r)| r.as_ref().unwrap_err().contains("not found")));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn render_failure_is_per_page() {
        let tier = TesseractOcrTier::new(OcrConfig::default(), Arc::new(FailingRenderer));
        let out = tier.extract(&doc(), &[2, 3]).await;
        assert_eq!(out.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![2, 3]);
        assert!(out.iter().all(|(_, r)| r.as_ref().unwrap_err().contains("no pdfium")));
    }
}
