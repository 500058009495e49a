//! Multi-pass vision extraction over the strategic pages.
//!
//! ## State machine
//!
//! ```text
//! Pending ──▶ InProgress ──┬──▶ Converged         (a pass added no coverage, or nothing left)
//!               ▲    │     ├──▶ BudgetExhausted   (the guard denied a call)
//!               └────┘     ├──▶ MaxPassesReached  (hard pass cap)
//!                          └──▶ Cancelled         (session token or timeout)
//! ```
//!
//! Each pass dispatches every selected page not yet in `pages_covered`, with
//! at most `concurrency` calls in flight. The coordinator waits for the whole
//! pass, sorts outcomes by page, then merges; completion order never affects
//! the result. Every terminal state is a success from the caller's side: the
//! merged result is always returned, and selected pages without a vision
//! record carry their cascade text in [`MergedResult::text_fallback`].

use crate::document::Document;
use crate::error::PageError;
use crate::progress::ProgressCallback;
use crate::schema::MergedResult;
use crate::selection::SelectionResult;
use crate::text::PageText;
use crate::vision::{VisionExtractor, VisionOutcome};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Pending,
    InProgress,
    Converged,
    BudgetExhausted,
    MaxPassesReached,
    Cancelled,
}

impl CoordinatorState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CoordinatorState::Pending | CoordinatorState::InProgress)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoordinatorState::Pending => "pending",
            CoordinatorState::InProgress => "in progress",
            CoordinatorState::Converged => "converged",
            CoordinatorState::BudgetExhausted => "budget exhausted",
            CoordinatorState::MaxPassesReached => "max passes reached",
            CoordinatorState::Cancelled => "cancelled",
        })
    }
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: usize,
    pub attempted: Vec<usize>,
    /// Pages added to `pages_covered` by this pass.
    pub newly_covered: Vec<usize>,
    pub errors: Vec<PageError>,
}

/// Everything the coordinator produced for one document.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    pub state: CoordinatorState,
    pub merged: MergedResult,
    pub passes: Vec<PassReport>,
    /// Pages that returned a usable vision record at least once.
    pub vision_pages: BTreeSet<usize>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub rejected_facts: usize,
    pub sanitized_replies: usize,
}

impl CoordinatorOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &PageError> {
        self.passes.iter().flat_map(|p| p.errors.iter())
    }
}

/// Drives [`VisionExtractor`] over the selection until a terminal state.
#[derive(Clone)]
pub struct MultiPassCoordinator {
    extractor: VisionExtractor,
    max_passes: usize,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl MultiPassCoordinator {
    pub fn new(extractor: VisionExtractor, max_passes: usize, concurrency: usize) -> Self {
        Self {
            extractor,
            max_passes,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run passes over `selection` until a terminal state.
    ///
    /// `cascade` supplies the fallback text for pages left uncovered.
    pub async fn run(
        &self,
        document: &Document,
        selection: &SelectionResult,
        cascade: &[PageText],
        cancel: &CancellationToken,
    ) -> CoordinatorOutcome {
        let targets = selection.pages();
        let mut out = CoordinatorOutcome {
            state: CoordinatorState::Pending,
            merged: MergedResult::default(),
            passes: Vec::new(),
            vision_pages: BTreeSet::new(),
            input_tokens: 0,
            output_tokens: 0,
            rejected_facts: 0,
            sanitized_replies: 0,
        };

        loop {
            let pending: Vec<usize> = targets
                .iter()
                .copied()
                .filter(|p| !out.merged.pages_covered.contains(p))
                .collect();

            if cancel.is_cancelled() {
                out.state = CoordinatorState::Cancelled;
                break;
            }
            if pending.is_empty() {
                out.state = CoordinatorState::Converged;
                break;
            }
            if out.passes.len() >= self.max_passes {
                out.state = CoordinatorState::MaxPassesReached;
                break;
            }
            if self.extractor.guard().is_exhausted() {
                out.state = CoordinatorState::BudgetExhausted;
                break;
            }

            out.state = CoordinatorState::InProgress;
            let pass = out.passes.len() + 1;
            info!("Vision pass {}: {} pages {:?}", pass, pending.len(), pending);
            if let Some(cb) = &self.progress {
                cb.on_pass_start(pass, &pending);
            }

            let mut outcomes: Vec<VisionOutcome> = stream::iter(pending.iter().map(|&page| {
                let extractor = &self.extractor;
                async move { extractor.extract_page(document, page, cancel).await }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
            outcomes.sort_by_key(|o| o.page);

            let report = self.merge_pass(pass, pending, outcomes, &mut out);
            let budget_denied = report
                .errors
                .iter()
                .any(|e| matches!(e, PageError::BudgetDenied { .. }));
            let gained = !report.newly_covered.is_empty();
            info!(
                "Vision pass {} done: +{} pages, {} covered, {} errors",
                pass,
                report.newly_covered.len(),
                out.merged.pages_covered.len(),
                report.errors.len()
            );
            out.passes.push(report);
            if let Some(cb) = &self.progress {
                cb.on_pass_complete(pass, out.merged.pages_covered.len());
            }

            if budget_denied {
                out.state = CoordinatorState::BudgetExhausted;
                break;
            }
            if cancel.is_cancelled() {
                out.state = CoordinatorState::Cancelled;
                break;
            }
            if !gained {
                out.state = CoordinatorState::Converged;
                break;
            }
        }

        for &page in &targets {
            if out.merged.pages_covered.contains(&page) {
                continue;
            }
            if let Some(text) = cascade.iter().find(|t| t.page == page).filter(|t| !t.text.is_empty()) {
                out.merged.text_fallback.insert(page, text.text.clone());
            }
        }

        info!(
            "Extraction {} after {} pass(es): {}/{} strategic pages covered by vision",
            out.state,
            out.passes.len(),
            targets.iter().filter(|p| out.merged.pages_covered.contains(p)).count(),
            targets.len()
        );
        if let Some(cb) = &self.progress {
            cb.on_extraction_complete(out.state, out.passes.len());
        }
        out
    }

    /// Merge one pass's outcomes, already sorted by page.
    fn merge_pass(
        &self,
        pass: usize,
        attempted: Vec<usize>,
        outcomes: Vec<VisionOutcome>,
        out: &mut CoordinatorOutcome,
    ) -> PassReport {
        let covered_before: BTreeSet<usize> = out.merged.pages_covered.clone();
        let mut errors = Vec::new();

        for outcome in outcomes {
            out.input_tokens += outcome.input_tokens;
            out.output_tokens += outcome.output_tokens;
            out.rejected_facts += outcome.rejected_facts;
            if outcome.sanitized {
                out.sanitized_replies += 1;
            }
            match outcome.result {
                Ok(record) => {
                    let before = out.merged.pages_covered.len();
                    out.merged.merge_record(&record);
                    out.vision_pages.insert(outcome.page);
                    let added = out.merged.pages_covered.len() - before;
                    debug!("Page {}: merged, +{} covered", outcome.page, added);
                    if let Some(cb) = &self.progress {
                        cb.on_page_complete(outcome.page, pass, added);
                    }
                }
                Err(e) => {
                    if !matches!(e, PageError::BudgetDenied { .. } | PageError::Cancelled { .. }) {
                        warn!("Pass {}: {}; keeping cascade text", pass, e);
                    }
                    if let Some(cb) = &self.progress {
                        cb.on_page_error(outcome.page, pass, &e.to_string());
                    }
                    errors.push(e);
                }
            }
        }

        PassReport {
            pass,
            attempted,
            newly_covered: out
                .merged
                .pages_covered
                .difference(&covered_before)
                .copied()
                .collect(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostBudget;
    use crate::cost::CostGuard;
    use crate::pipeline::render::PageRenderer;
    use crate::selection::{SelectionDecision, SelectionReason};
    use crate::vision::StubVisionClient;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::Arc;
    use std::time::Duration;

    struct WhitePage;

    impl PageRenderer for WhitePage {
        fn render_page(&self, _document: &Document, _page: usize) -> Result<DynamicImage, PageError> {
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                2,
                2,
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    fn selection(pages: &[usize]) -> SelectionResult {
        let mut s = SelectionResult {
            total_pages: 10,
            ..SelectionResult::default()
        };
        for &page in pages {
            s.fallback.push(page);
            s.decisions.push(SelectionDecision {
                page,
                category: None,
                score: 0.0,
                reason: SelectionReason::StructuralFallback,
            });
        }
        s
    }

    fn coordinator(stub: Arc<StubVisionClient>, calls: u64, max_passes: usize) -> MultiPassCoordinator {
        let extractor = VisionExtractor::new(
            stub,
            Arc::new(WhitePage),
            Arc::new(CostGuard::new(CostBudget::calls(calls))),
            Duration::from_secs(30),
        );
        MultiPassCoordinator::new(extractor, max_passes, 3)
    }

    fn doc() -> Document {
        Document::from_bytes("deck.pdf", b"%PDF-1.7".to_vec(), 10)
    }

    fn cascade() -> Vec<PageText> {
        (1..=10)
            .map(|page| PageText {
                page,
                text: format!("cascade text {page}"),
                tier: Some("content_stream".into()),
                errors: vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn everything_covered_in_one_pass_converges() {
        let stub = Arc::new(StubVisionClient::new());
        let out = coordinator(stub.clone(), 10, 3)
            .run(&doc(), &selection(&[2, 5, 8]), &cascade(), &CancellationToken::new())
            .await;
        assert_eq!(out.state, CoordinatorState::Converged);
        assert_eq!(out.passes.len(), 1);
        assert_eq!(out.merged.pages_covered.iter().copied().collect::<Vec<_>>(), vec![2, 5, 8]);
        assert!(out.merged.text_fallback.is_empty());
        assert_eq!(stub.calls().len(), 3);
    }

    #[tokio::test]
    async fn failed_pages_are_retried_next_pass() {
        let stub = Arc::new(StubVisionClient::new().with_failure(5, "503").with_reply(5, "{}"));
        let out = coordinator(stub, 10, 3)
            .run(&doc(), &selection(&[2, 5]), &cascade(), &CancellationToken::new())
            .await;
        assert_eq!(out.state, CoordinatorState::Converged);
        assert_eq!(out.passes.len(), 2);
        assert_eq!(out.passes[1].attempted, vec![5]);
        assert_eq!(out.passes[1].newly_covered, vec![5]);
    }

    #[tokio::test]
    async fn persistent_failures_hit_the_pass_cap() {
        // Each pass gains one page, so only the cap stops it.
        let stub = Arc::new(
            StubVisionClient::new()
                .with_failure(4, "x")
                .with_reply(4, "{}")
                .with_failure(6, "x")
                .with_failure(6, "x")
                .with_reply(6, "{}")
                .with_failure(8, "x"),
        );
        let out = coordinator(stub, 20, 3)
            .run(&doc(), &selection(&[2, 4, 6, 8]), &cascade(), &CancellationToken::new())
            .await;
        assert_eq!(out.state, CoordinatorState::MaxPassesReached);
        assert_eq!(out.passes.len(), 3);
        assert_eq!(out.merged.text_fallback.keys().copied().collect::<Vec<_>>(), vec![8]);
    }

    #[tokio::test]
    async fn budget_denial_merges_partial_results() {
        let stub = Arc::new(StubVisionClient::new());
        let out = coordinator(stub.clone(), 2, 3)
            .run(&doc(), &selection(&[1, 2, 3, 4, 5]), &cascade(), &CancellationToken::new())
            .await;
        assert_eq!(out.state, CoordinatorState::BudgetExhausted);
        assert_eq!(out.vision_pages.len(), 2);
        assert_eq!(out.merged.text_fallback.len(), 3);
        assert_eq!(stub.calls().len(), 2);
    }

    #[derive(Default)]
    struct PageOrder(std::sync::Mutex<Vec<usize>>);

    impl crate::progress::ExtractionProgressCallback for PageOrder {
        fn on_page_complete(&self, page: usize, _pass: usize, _new_pages: usize) {
            self.0.lock().unwrap().push(page);
        }

        fn on_page_error(&self, page: usize, _pass: usize, _error: &str) {
            self.0.lock().unwrap().push(page);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn page_events_follow_page_order() {
        // Page 2 answers last but is still reported first.
        let stub = Arc::new(
            StubVisionClient::new()
                .with_delay(2, Duration::from_secs(5))
                .with_failure(6, "503"),
        );
        let order = Arc::new(PageOrder::default());
        let out = coordinator(stub, 10, 1)
            .with_progress(Some(order.clone() as ProgressCallback))
            .run(&doc(), &selection(&[2, 4, 6]), &cascade(), &CancellationToken::new())
            .await;
        assert_eq!(out.passes.len(), 1);
        assert_eq!(*order.0.lock().unwrap(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn cancelled_before_start_issues_no_calls() {
        let stub = Arc::new(StubVisionClient::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = coordinator(stub.clone(), 10, 3)
            .run(&doc(), &selection(&[1, 2, 3]), &cascade(), &cancel)
            .await;
        assert_eq!(out.state, CoordinatorState::Cancelled);
        assert!(out.passes.is_empty());
        assert!(stub.calls().is_empty());
        assert_eq!(out.merged.text_fallback.len(), 3);
    }

    #[test]
    fn terminal_states() {
        assert!(!CoordinatorState::Pending.is_terminal());
        assert!(!CoordinatorState::InProgress.is_terminal());
        assert!(CoordinatorState::Converged.is_terminal());
        assert!(CoordinatorState::Cancelled.is_terminal());
    }
}
