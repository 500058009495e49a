//! Progress-callback trait for extraction events.
//!
//! Attach an [`Arc<dyn ExtractionProgressCallback>`] to an
//! [`crate::session::ExtractionSession`] via its builder to follow a document
//! through text extraction, selection and the vision passes. Callers can
//! forward the events to a channel, a log, or a terminal progress bar.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2facts::ExtractionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: usize, pass: usize, new_pages: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("pass {pass}: page {page} done (+{new_pages} covered)");
//!     }
//! }
//! ```

use crate::coordinator::CoordinatorState;
use std::sync::Arc;

/// Called by the session as a document moves through the pipeline.
///
/// Page events are delivered once their pass has finished, in ascending page
/// order, followed by `on_pass_complete`.
/// Every method has a no-op default.
pub trait ExtractionProgressCallback: Send + Sync {
    /// The text cascade finished: `pages_with_text` of `total_pages`.
    fn on_text_extracted(&self, total_pages: usize, pages_with_text: usize) {
        let _ = (total_pages, pages_with_text);
    }

    /// Strategic pages were chosen.
    fn on_selection(&self, selected: &[usize], used_fallback: bool) {
        let _ = (selected, used_fallback);
    }

    /// A vision pass is about to dispatch `pages`.
    fn on_pass_start(&self, pass: usize, pages: &[usize]) {
        let _ = (pass, pages);
    }

    /// A page returned a usable record adding `new_pages` to coverage.
    fn on_page_complete(&self, page: usize, pass: usize, new_pages: usize) {
        let _ = (page, pass, new_pages);
    }

    /// A page produced no record; it keeps its cascade text.
    fn on_page_error(&self, page: usize, pass: usize, error: &str) {
        let _ = (page, pass, error);
    }

    /// A pass finished; `covered` is the cumulative covered-page count.
    fn on_pass_complete(&self, pass: usize, covered: usize) {
        let _ = (pass, covered);
    }

    /// The coordinator reached a terminal state.
    fn on_extraction_complete(&self, state: CoordinatorState, passes: usize) {
        let _ = (state, passes);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Shared callback handle.
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
