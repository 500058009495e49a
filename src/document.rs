//! Documents and their identity.
//!
//! A [`Document`] is the unit the whole pipeline works on: the raw PDF bytes,
//! a page count, and a stable [`DocumentKey`]. The key is the SHA-256 of the
//! bytes unless the upstream source supplies its own id, so reloading the
//! same file hits the same cache entry and a changed file never does.

use crate::config::ExtractionConfig;
use crate::error::Pdf2FactsError;
use crate::pipeline::{input, render};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Stable identity of a document within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Content hash of the document bytes (lower-case hex SHA-256).
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// An identifier supplied by the upstream source (e.g. a storage object id).
    pub fn from_source_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hashes are long; twelve hex digits is plenty for log lines.
        if self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            f.write_str(&self.0[..12])
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A PDF document loaded for one processing session.
#[derive(Clone)]
pub struct Document {
    key: DocumentKey,
    label: String,
    bytes: Arc<[u8]>,
    page_count: usize,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("bytes", &self.bytes.len())
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl Document {
    /// Wrap bytes and a page count supplied by an upstream ingestion step.
    ///
    /// The key is the content hash; use [`Document::with_key`] to override.
    pub fn from_bytes(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>, page_count: usize) -> Self {
        let bytes = bytes.into();
        Self {
            key: DocumentKey::from_content(&bytes),
            label: label.into(),
            bytes,
            page_count,
        }
    }

    /// Replace the content-hash key with an upstream identifier.
    pub fn with_key(mut self, key: DocumentKey) -> Self {
        self.key = key;
        self
    }

    /// Load a local PDF or download one from an HTTP(S) URL, counting pages
    /// with pdfium.
    pub async fn open(input_str: &str, config: &ExtractionConfig) -> Result<Self, Pdf2FactsError> {
        let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
        let bytes = tokio::fs::read(resolved.path())
            .await
            .map_err(|e| Pdf2FactsError::Internal(format!("Failed to read {}: {e}", resolved.path().display())))?;
        let bytes: Arc<[u8]> = bytes.into();

        let page_count =
            render::page_count(Arc::clone(&bytes), input_str.to_string(), config.password.clone()).await?;
        info!("Loaded '{}': {} pages, {} bytes", input_str, page_count, bytes.len());

        Ok(Self::from_bytes(input_str, bytes, page_count))
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Human-readable origin (path, URL, or upstream label).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes, for moving into blocking tasks.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_is_stable_and_content_sensitive() {
        let a = DocumentKey::from_content(b"%PDF-1.7 one");
        let b = DocumentKey::from_content(b"%PDF-1.7 one");
        let c = DocumentKey::from_content(b"%PDF-1.7 two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn content_key_is_lowercase_hex_sha256() {
        assert_eq!(
            DocumentKey::from_content(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn display_shortens_hashes_only() {
        let hashed = DocumentKey::from_content(b"x");
        assert_eq!(hashed.to_string().len(), 12);
        let named = DocumentKey::from_source_id("drive:abc");
        assert_eq!(named.to_string(), "drive:abc");
    }

    #[test]
    fn with_key_overrides_hash() {
        let doc = Document::from_bytes("deck.pdf", b"%PDF".to_vec(), 4)
            .with_key(DocumentKey::from_source_id("deal-42"));
        assert_eq!(doc.key().as_str(), "deal-42");
        assert_eq!(doc.page_count(), 4);
    }
}
