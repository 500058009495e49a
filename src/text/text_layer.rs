//! Tier 2: pdfium's native text layer.
//!
//! pdfium resolves fonts, encodings and reading order far better than a raw
//! content-stream walk, which rescues decks built from exotic font subsets.

use super::{TextTier, TierOutput};
use crate::document::Document;
use crate::pipeline::render::text_layer_blocking;
use async_trait::async_trait;

/// pdfium text-layer extraction.
#[derive(Debug, Clone, Default)]
pub struct TextLayerTier {
    password: Option<String>,
}

impl TextLayerTier {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl TextTier for TextLayerTier {
    fn name(&self) -> &str {
        "text_layer"
    }

    async fn extract(&self, document: &Document, pages: &[usize]) -> TierOutput {
        let bytes = document.shared_bytes();
        let password = self.password.clone();
        let wanted = pages.to_vec();
        tokio::task::spawn_blocking(move || text_layer_blocking(&bytes, password.as_deref(), &wanted))
            .await
            .unwrap_or_else(|e| {
                let detail = format!("text-layer task panicked: {e}");
                pages.iter().map(|&p| (p, Err(detail.clone()))).collect()
            })
    }
}
