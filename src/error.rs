//! Error types for the edgequake-pdf2facts library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2FactsError`]: **fatal**, no extraction is possible at all (bad
//!   input, wrong password, provider not configured, every text tier failed on
//!   every page). Returned as `Err(Pdf2FactsError)` from
//!   [`crate::session::ExtractionSession::extract`] and friends.
//!
//! * [`PageError`]: **non-fatal**, one page (or one vision call) failed.
//!   Recorded in [`crate::output::ExtractionMetadata::errors`] and
//!   absorbed; the page falls back to its cascade text.
//!
//! A budget running out is neither: it is a terminal coordinator state and a
//! flag on the metadata, and the caller still receives a usable result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2facts library.
#[derive(Debug, Error)]
pub enum Pdf2FactsError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes are not a PDF.
    #[error("Input is not a valid PDF: '{source_label}'\nFirst bytes: {magic:?}")]
    NotAPdf { source_label: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_label}' is corrupt: {detail}")]
    CorruptPdf { source_label: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_label}' is encrypted and requires a password.")]
    PasswordRequired { source_label: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_label}'")]
    WrongPassword { source_label: String },

    /// Every text-extraction tier failed on every page.
    ///
    /// This is the only whole-document failure of the pipeline itself; the
    /// caller should present it as "document could not be processed".
    #[error("Document '{source_label}' could not be processed: all text extraction tiers failed on all {pages} pages")]
    DocumentUnreadable { source_label: String, pages: usize },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A category table failed validation or could not be parsed.
    #[error("Invalid category table: {0}")]
    CategoryTableInvalid(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The page keeps its cascade text as the result; the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The vision model call itself failed (transport, provider error).
    #[error("Page {page}: extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// The vision model replied, but not with the expected JSON object,
    /// even after sanitization.
    #[error("Page {page}: malformed model response: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The vision model did not answer within the per-page timeout.
    #[error("Page {page}: vision call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The cost guard refused the call.
    #[error("Page {page}: budget exhausted, vision call denied")]
    BudgetDenied { page: usize },

    /// The session was cancelled before the call was issued.
    #[error("Page {page}: cancelled before extraction")]
    Cancelled { page: usize },

    /// A text-extraction tier failed on this page.
    #[error("Page {page}: text tier '{tier}' failed: {detail}")]
    TextTierFailed {
        page: usize,
        tier: String,
        detail: String,
    },
}

impl PageError {
    /// The 1-based page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ExtractionFailed { page, .. }
            | PageError::MalformedResponse { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::BudgetDenied { page }
            | PageError::Cancelled { page }
            | PageError::TextTierFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_unreadable_display() {
        let e = Pdf2FactsError::DocumentUnreadable {
            source_label: "deck.pdf".into(),
            pages: 12,
        };
        let msg = e.to_string();
        assert!(msg.contains("could not be processed"), "got: {msg}");
        assert!(msg.contains("12 pages"), "got: {msg}");
    }

    #[test]
    fn timeout_display() {
        let e = PageError::Timeout { page: 3, secs: 30 };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("Page 3"));
    }

    #[test]
    fn page_accessor_covers_every_variant() {
        let errors = [
            PageError::RenderFailed { page: 1, detail: String::new() },
            PageError::ExtractionFailed { page: 2, detail: String::new() },
            PageError::MalformedResponse { page: 3, detail: String::new() },
            PageError::Timeout { page: 4, secs: 1 },
            PageError::BudgetDenied { page: 5 },
            PageError::Cancelled { page: 6 },
            PageError::TextTierFailed { page: 7, tier: "ocr".into(), detail: String::new() },
        ];
        let pages: Vec<usize> = errors.iter().map(PageError::page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::BudgetDenied { page: 9 };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
