//! Low-level PDF and model-I/O stages shared by the text tiers and the
//! vision extractor.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ (vision call) ──▶ sanitize
//! (URL/path) (pdfium)  (PNG/base64)                 (JSON cleanup)
//! ```
//!
//! 1. [`input`]   : canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]  : page counts, rasterisation and the pdfium text layer;
//!    blocking, so always driven through `spawn_blocking`
//! 3. [`encode`]  : PNG bytes for OCR, base64 `ImageData` for the model
//! 4. [`sanitize`]: recover a JSON object from a reply wrapped in markup

pub mod encode;
pub mod input;
pub mod render;
pub mod sanitize;
