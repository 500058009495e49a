//! Tier 1: decode page content streams with lopdf.
//!
//! No rendering engine and no native library: this is the cheapest way to get
//! at the text of a born-digital PDF. It knows nothing about layout, so
//! columns may interleave, but keyword scoring does not care about order.

use super::{TextTier, TierOutput};
use crate::document::Document;
use async_trait::async_trait;

/// lopdf-based content-stream text extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentStreamTier;

fn extract_blocking(bytes: &[u8], pages: &[usize]) -> TierOutput {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            let detail = format!("lopdf could not parse document: {e}");
            return pages.iter().map(|&p| (p, Err(detail.clone()))).collect();
        }
    };

    pages
        .iter()
        .map(|&page| {
            let text = u32::try_from(page)
                .map_err(|e| e.to_string())
                .and_then(|n| doc.extract_text(&[n]).map_err(|e| e.to_string()));
            (page, text)
        })
        .collect()
}

#[async_trait]
impl TextTier for ContentStreamTier {
    fn name(&self) -> &str {
        "content_stream"
    }

    async fn extract(&self, document: &Document, pages: &[usize]) -> TierOutput {
        let bytes = document.shared_bytes();
        let wanted = pages.to_vec();
        tokio::task::spawn_blocking(move || extract_blocking(&bytes, &wanted))
            .await
            .unwrap_or_else(|e| {
                let detail = format!("content-stream task panicked: {e}");
                pages.iter().map(|&p| (p, Err(detail.clone()))).collect()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn garbage_bytes_fail_every_page_without_panicking() {
        let doc = Document::from_bytes("junk.pdf", b"%PDF-1.7 not really".to_vec(), 3);
        let out = ContentStreamTier.extract(&doc, &[1, 2, 3]).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, r)| r.is_err()));
    }
}
