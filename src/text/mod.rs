//! Tiered plain-text extraction with per-page fallback.
//!
//! ```text
//! content_stream (lopdf) ──▶ text_layer (pdfium) ──▶ ocr (tesseract)
//!    cheapest                  layout-aware             rasterise + OCR
//! ```
//!
//! Each page walks down the tiers until one returns non-blank text. A tier
//! failing on a page is logged and recorded, never raised; the page simply
//! moves on to the next tier. The cascade output is the scoring input and the
//! last-resort result for any page the vision stage does not cover.
//!
//! The only fatal outcome is [`Pdf2FactsError::DocumentUnreadable`]: no tier
//! succeeded on any page, not even with empty text.

pub mod content_stream;
pub mod ocr;
pub mod text_layer;

pub use content_stream::ContentStreamTier;
pub use ocr::TesseractOcrTier;
pub use text_layer::TextLayerTier;

use crate::config::ExtractionConfig;
use crate::document::Document;
use crate::error::{PageError, Pdf2FactsError};
use crate::pipeline::render::PageRenderer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-page outcome of one tier: the page number and its text or a reason.
pub type TierOutput = Vec<(usize, Result<String, String>)>;

/// One text-extraction method.
#[async_trait]
pub trait TextTier: Send + Sync {
    /// Short stable name used in logs and page profiles.
    fn name(&self) -> &str;

    /// Extract text for the given 1-based pages. Pages missing from the
    /// output count as failures.
    async fn extract(&self, document: &Document, pages: &[usize]) -> TierOutput;
}

/// Final cascade result for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page: usize,
    /// Trimmed text; empty when no tier found any.
    pub text: String,
    /// Name of the tier that produced `text`.
    pub tier: Option<String>,
    /// Failures recorded on the way down the tiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PageError>,
}

#[derive(Default)]
struct PageProgress {
    text: Option<(String, String)>,
    readable: bool,
    errors: Vec<PageError>,
}

/// Ordered list of text tiers.
#[derive(Clone)]
pub struct TextExtractionCascade {
    tiers: Vec<Arc<dyn TextTier>>,
}

impl TextExtractionCascade {
    pub fn new(tiers: Vec<Arc<dyn TextTier>>) -> Self {
        Self { tiers }
    }

    /// lopdf → pdfium text layer → tesseract OCR (when enabled).
    pub fn standard(config: &ExtractionConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        let mut tiers: Vec<Arc<dyn TextTier>> = vec![
            Arc::new(ContentStreamTier),
            Arc::new(TextLayerTier::new(config.password.clone())),
        ];
        if config.ocr.enabled {
            tiers.push(Arc::new(TesseractOcrTier::new(config.ocr.clone(), renderer)));
        }
        Self::new(tiers)
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Run the cascade over every page of `document`.
    pub async fn extract(&self, document: &Document) -> Result<Vec<PageText>, Pdf2FactsError> {
        let total = document.page_count();
        let mut progress: BTreeMap<usize, PageProgress> =
            (1..=total).map(|p| (p, PageProgress::default())).collect();
        let mut pending: Vec<usize> = (1..=total).collect();

        for tier in &self.tiers {
            if pending.is_empty() {
                break;
            }
            let name = tier.name().to_string();
            debug!("Text tier '{}': {} pages pending", name, pending.len());

            let mut outputs: BTreeMap<usize, Result<String, String>> =
                tier.extract(document, &pending).await.into_iter().collect();

            for &page in &pending {
                let Some(entry) = progress.get_mut(&page) else {
                    continue;
                };
                match outputs.remove(&page) {
                    Some(Ok(text)) => {
                        entry.readable = true;
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            entry.text = Some((trimmed.to_string(), name.clone()));
                        }
                    }
                    Some(Err(detail)) => {
                        warn!("Page {}: text tier '{}' failed: {}", page, name, detail);
                        entry.errors.push(PageError::TextTierFailed {
                            page,
                            tier: name.clone(),
                            detail,
                        });
                    }
                    None => {
                        warn!("Page {}: text tier '{}' returned nothing", page, name);
                        entry.errors.push(PageError::TextTierFailed {
                            page,
                            tier: name.clone(),
                            detail: "no output for page".into(),
                        });
                    }
                }
            }

            pending.retain(|p| progress.get(p).is_some_and(|e| e.text.is_none()));
        }

        if !progress.values().any(|p| p.readable) {
            return Err(Pdf2FactsError::DocumentUnreadable {
                source_label: document.label().to_string(),
                pages: total,
            });
        }

        let pages: Vec<PageText> = progress
            .into_iter()
            .map(|(page, p)| {
                let (text, tier) = match p.text {
                    Some((text, tier)) => (text, Some(tier)),
                    None => (String::new(), None),
                };
                PageText {
                    page,
                    text,
                    tier,
                    errors: p.errors,
                }
            })
            .collect();

        let with_text = pages.iter().filter(|p| !p.text.is_empty()).count();
        info!(
            "Text cascade: {}/{} pages with text ({} still empty)",
            with_text,
            total,
            total - with_text
        );
        Ok(pages)
    }
}
