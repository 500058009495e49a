//! Output types for one extracted document.
//!
//! A [`CacheEntry`] is what the session stores per document and hands to
//! every downstream consumer: the merged result, the selection plan that
//! produced it, a profile of every page, and run metadata.

use crate::coordinator::{CoordinatorState, PassReport};
use crate::cost::BudgetSnapshot;
use crate::document::DocumentKey;
use crate::error::PageError;
use crate::schema::MergedResult;
use crate::scoring::CategoryScore;
use crate::selection::SelectionResult;
use serde::{Deserialize, Serialize};

/// Diagnostic view of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProfile {
    pub page: usize,
    /// Cascade text (trimmed; empty when no tier found any).
    pub text: String,
    /// Text tier that produced `text`.
    pub text_tier: Option<String>,
    /// Category scores, best first.
    pub scores: Vec<CategoryScore>,
    pub selected: bool,
    /// Whether a vision record was merged for this page.
    pub vision: bool,
}

/// Run statistics for one extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source: String,
    pub total_pages: usize,
    /// Pages that returned a usable vision record.
    pub pages_processed: Vec<usize>,
    pub passes: usize,
    pub state: CoordinatorState,
    pub budget_exhausted: bool,
    /// Guard state when the extraction finished; the guard is session-wide,
    /// so this includes spend from earlier documents.
    pub budget: BudgetSnapshot,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub rejected_facts: usize,
    pub sanitized_replies: usize,
    pub elapsed_ms: u64,
    pub text_duration_ms: u64,
    pub vision_duration_ms: u64,
    /// Every non-fatal page error, text tiers first, then vision passes.
    pub errors: Vec<PageError>,
    pub pass_reports: Vec<PassReport>,
}

/// The cached extraction of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: DocumentKey,
    pub result: MergedResult,
    pub selection: SelectionResult,
    pub pages: Vec<PageProfile>,
    pub metadata: ExtractionMetadata,
}

impl CacheEntry {
    /// True unless every strategic page was covered by vision.
    pub fn is_partial(&self) -> bool {
        self.selection
            .pages()
            .iter()
            .any(|p| !self.result.pages_covered.contains(p))
    }

    pub fn page(&self, page: usize) -> Option<&PageProfile> {
        self.pages.iter().find(|p| p.page == page)
    }

    /// One-line human summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} pages, {} selected, {} by vision, {} pass(es), {} ({} facts, {}/{} {} budget)",
            self.metadata.source,
            self.metadata.total_pages,
            self.selection.len(),
            self.metadata.pages_processed.len(),
            self.metadata.passes,
            self.metadata.state,
            self.result.financials.len(),
            self.metadata.budget.consumed,
            self.metadata.budget.ceiling,
            self.metadata.budget.unit,
        )
    }
}

/// Text extraction, scoring and selection for one document, without any
/// vision calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPlan {
    pub key: DocumentKey,
    pub selection: SelectionResult,
    pub pages: Vec<PageProfile>,
    pub text_duration_ms: u64,
}
