//! # edgequake-pdf2facts
//!
//! Extract structured, citable facts (financials, competitors, team, risks)
//! from long, visually dense PDFs such as investor decks and financial
//! reports.
//!
//! ## Why a hybrid pipeline?
//!
//! Plain text extraction misses whatever lives in charts, screenshots and
//! flattened slides. Sending every page to a vision model is too slow and too
//! expensive. This crate reads every page cheaply, scores the text for
//! category signal, and spends vision calls only on the few pages most
//! likely to carry the facts, under a hard budget.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Text      content stream → pdfium text layer → OCR, per page
//!  ├─ 2. Score     keyword density per category
//!  ├─ 3. Select    ≤ 7 strategic pages by priority and quota (structural fallback)
//!  ├─ 4. Vision    up to 3 passes, bounded concurrency, cost-guarded
//!  ├─ 5. Merge     typed, order-independent union of per-page JSON records
//!  └─ 6. Cache     one entry per document for the rest of the session
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2facts::{CostBudget, ExtractionConfig, ExtractionSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::builder()
//!         .budget(CostBudget::calls(10))
//!         .build()?;
//!     let session = ExtractionSession::from_config(config)?;
//!
//!     let entry = session.extract_path("deck.pdf").await?;
//!     for fact in entry.result.facts_for_metric("ARR") {
//!         println!("{} = {} (page {:?})", fact.metric, fact.value, fact.page);
//!     }
//!     eprintln!("{}", entry.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2facts` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2facts = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod categories;
pub mod config;
pub mod coordinator;
pub mod cost;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod scoring;
pub mod selection;
pub mod session;
pub mod text;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::ExtractionCache;
pub use categories::{Category, CategoryTable, Priority, Signal, SignalKind};
pub use config::{BudgetUnit, CostBudget, ExtractionConfig, ExtractionConfigBuilder, OcrConfig, TokenPrice};
pub use coordinator::{CoordinatorState, MultiPassCoordinator, PassReport};
pub use cost::{BudgetSnapshot, CostGuard};
pub use document::{Document, DocumentKey};
pub use error::{PageError, Pdf2FactsError};
pub use output::{CacheEntry, ExtractionMetadata, PageProfile, SelectionPlan};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{ExtractionRecord, FinancialFact, MergedResult, SourcedValue};
pub use scoring::{CategoryScore, ContentScorer, PageScores};
pub use selection::{PageSelector, SelectionDecision, SelectionReason, SelectionResult};
pub use session::{ExtractionSession, ExtractionSessionBuilder};
pub use text::{PageText, TextExtractionCascade, TextTier, TierOutput};
pub use vision::{LlmVisionClient, StubVisionClient, VisionClient, VisionExtractor, VisionOutcome, VisionReply, VisionRequest};
