//! Cost-guarded, time-bounded vision extraction of a single page.
//!
//! ```text
//! render ──▶ encode ──▶ charge guard ──▶ model call (timeout) ──▶ parse ──▶ validate
//!  (pdfium)   (base64)   (deny ⇒ stop)     (VisionClient)          (+1 sanitize pass)
//! ```
//!
//! An exhausted guard stops a page before it is rendered. Otherwise the
//! guard is charged only after the page image is ready, immediately before
//! the request goes out, so a page that fails to render costs nothing. A
//! reply settles the charge to the tokens the provider reported.
//! Failures never propagate: [`VisionExtractor::extract_page`] always
//! returns a [`VisionOutcome`], whose error tells the coordinator to fall
//! back to cascade text for that page.

mod client;
mod stub;

pub use client::{resolve_provider, LlmVisionClient, VisionClient, VisionReply, VisionRequest};
pub use stub::StubVisionClient;

use crate::cost::CostGuard;
use crate::document::Document;
use crate::error::PageError;
use crate::pipeline::encode::encode_for_vision;
use crate::pipeline::render::{render_blocking, PageRenderer};
use crate::pipeline::sanitize::sanitize_json_reply;
use crate::prompts::{page_instruction, DEFAULT_SYSTEM_PROMPT};
use crate::schema::ExtractionRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one vision attempt on one page.
#[derive(Debug, Clone)]
pub struct VisionOutcome {
    pub page: usize,
    /// The validated record, or why there is none.
    pub result: Result<ExtractionRecord, PageError>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    /// Whether the reply only parsed after sanitization.
    pub sanitized: bool,
    /// Financial facts dropped by validation.
    pub rejected_facts: usize,
}

impl VisionOutcome {
    fn failed(page: usize, error: PageError, started: Instant) -> Self {
        Self {
            page,
            result: Err(error),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            sanitized: false,
            rejected_facts: 0,
        }
    }

    pub fn is_budget_denied(&self) -> bool {
        matches!(self.result, Err(PageError::BudgetDenied { .. }))
    }
}

/// Drives one page through render, guard, model call and parse.
#[derive(Clone)]
pub struct VisionExtractor {
    client: Arc<dyn VisionClient>,
    renderer: Arc<dyn PageRenderer>,
    guard: Arc<CostGuard>,
    system_prompt: String,
    categories: Vec<String>,
    timeout: Duration,
}

impl VisionExtractor {
    pub fn new(
        client: Arc<dyn VisionClient>,
        renderer: Arc<dyn PageRenderer>,
        guard: Arc<CostGuard>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            renderer,
            guard,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            categories: Vec::new(),
            timeout,
        }
    }

    /// Override the built-in system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Narrative category names offered to the model.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn guard(&self) -> &Arc<CostGuard> {
        &self.guard
    }

    /// Extract one page. Never fails; see [`VisionOutcome::result`].
    pub async fn extract_page(&self, document: &Document, page: usize, cancel: &CancellationToken) -> VisionOutcome {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return VisionOutcome::failed(page, PageError::Cancelled { page }, started);
        }
        if self.guard.is_exhausted() {
            debug!("Page {}: budget already exhausted, not rendering", page);
            return VisionOutcome::failed(page, PageError::BudgetDenied { page }, started);
        }

        let image = match render_blocking(Arc::clone(&self.renderer), document.clone(), page).await {
            Ok(img) => img,
            Err(e) => {
                warn!("{}", e);
                return VisionOutcome::failed(page, e, started);
            }
        };
        let image = match encode_for_vision(&image) {
            Ok(data) => data,
            Err(e) => {
                let err = PageError::RenderFailed {
                    page,
                    detail: format!("image encode: {e}"),
                };
                return VisionOutcome::failed(page, err, started);
            }
        };

        if cancel.is_cancelled() {
            return VisionOutcome::failed(page, PageError::Cancelled { page }, started);
        }
        if !self.guard.charge_call() {
            debug!("Page {}: vision call denied by budget", page);
            return VisionOutcome::failed(page, PageError::BudgetDenied { page }, started);
        }

        let names: Vec<&str> = self.categories.iter().map(String::as_str).collect();
        let request = VisionRequest {
            page,
            total_pages: document.page_count(),
            image,
            system_prompt: self.system_prompt.clone(),
            instruction: page_instruction(page, document.page_count(), &names),
        };

        let call = tokio::time::timeout(self.timeout, self.client.complete(request));
        let reply = tokio::select! {
            _ = cancel.cancelled() => {
                return VisionOutcome::failed(page, PageError::Cancelled { page }, started);
            }
            r = call => r,
        };
        let reply = match reply {
            Ok(Ok(reply)) => {
                self.guard.settle_call(reply.input_tokens, reply.output_tokens);
                reply
            }
            Ok(Err(e)) => {
                warn!("{}", e);
                return VisionOutcome::failed(page, e, started);
            }
            Err(_) => {
                let err = PageError::Timeout {
                    page,
                    secs: self.timeout.as_secs(),
                };
                warn!("{}", err);
                return VisionOutcome::failed(page, err, started);
            }
        };

        let mut outcome = VisionOutcome {
            page,
            result: Err(PageError::MalformedResponse {
                page,
                detail: String::new(),
            }),
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            duration_ms: 0,
            sanitized: false,
            rejected_facts: 0,
        };

        match parse_record(&reply.content) {
            Ok((mut record, sanitized)) => {
                let validation = record.validate(page, document.page_count());
                outcome.sanitized = sanitized;
                outcome.rejected_facts = validation.rejected_facts;
                debug!(
                    "Page {}: {} facts, covers {:?}{}",
                    page,
                    record.financials.len(),
                    record.pages_covered,
                    if sanitized { " (sanitized)" } else { "" }
                );
                outcome.result = Ok(record);
            }
            Err(detail) => {
                let err = PageError::MalformedResponse { page, detail };
                warn!("{}", err);
                outcome.result = Err(err);
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }
}

/// Parse a reply as an [`ExtractionRecord`], with one sanitization retry.
///
/// Returns the record and whether sanitization was needed.
pub fn parse_record(content: &str) -> Result<(ExtractionRecord, bool), String> {
    match serde_json::from_str::<ExtractionRecord>(content.trim()) {
        Ok(record) => Ok((record, false)),
        Err(_) => {
            let cleaned = sanitize_json_reply(content);
            serde_json::from_str::<ExtractionRecord>(&cleaned)
                .map(|r| (r, true))
                .map_err(|e| format!("not a JSON object after sanitization: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostBudget;
    use image::{DynamicImage, Rgba, RgbaImage};

    struct WhitePage;

    impl PageRenderer for WhitePage {
        fn render_page(&self, _document: &Document, _page: usize) -> Result<DynamicImage, PageError> {
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                4,
                4,
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    struct BrokenRenderer;

    impl PageRenderer for BrokenRenderer {
        fn render_page(&self, _document: &Document, page: usize) -> Result<DynamicImage, PageError> {
            Err(PageError::RenderFailed {
                page,
                detail: "bitmap allocation".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        renders: std::sync::atomic::AtomicUsize,
    }

    impl PageRenderer for CountingRenderer {
        fn render_page(&self, document: &Document, page: usize) -> Result<DynamicImage, PageError> {
            self.renders.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            WhitePage.render_page(document, page)
        }
    }

    fn doc() -> Document {
        Document::from_bytes("deck.pdf", b"%PDF-1.7".to_vec(), 10)
    }

    fn extractor(stub: StubVisionClient, calls: u64) -> (VisionExtractor, Arc<StubVisionClient>) {
        let stub = Arc::new(stub);
        let ex = VisionExtractor::new(
            stub.clone(),
            Arc::new(WhitePage),
            Arc::new(CostGuard::new(CostBudget::calls(calls))),
            Duration::from_secs(30),
        );
        (ex, stub)
    }

    #[tokio::test]
    async fn fenced_reply_parses_after_sanitization() {
        let reply = "```json\n{\"financials\":[{\"metric\":\"ARR\",\"value\":\"$1M\",\"page\":4}]}\n```";
        let (ex, _) = extractor(StubVisionClient::new().with_reply(4, reply), 5);
        let out = ex.extract_page(&doc(), 4, &CancellationToken::new()).await;
        let record = out.result.unwrap();
        assert!(out.sanitized);
        assert_eq!(record.financials.len(), 1);
        assert_eq!(record.pages_covered, vec![4]);
    }

    #[tokio::test]
    async fn garbage_reply_is_malformed() {
        let (ex, _) = extractor(StubVisionClient::new().with_reply(2, "I can't read this."), 5);
        let out = ex.extract_page(&doc(), 2, &CancellationToken::new()).await;
        assert!(matches!(out.result, Err(PageError::MalformedResponse { page: 2, .. })));
    }

    #[tokio::test]
    async fn facts_without_page_are_rejected() {
        let reply = r#"{"financials":[{"metric":"Revenue","value":"$2M"},{"metric":"EBITDA","value":"-$1M","page":3}]}"#;
        let (ex, _) = extractor(StubVisionClient::new().with_reply(3, reply), 5);
        let out = ex.extract_page(&doc(), 3, &CancellationToken::new()).await;
        assert_eq!(out.rejected_facts, 1);
        assert_eq!(out.result.unwrap().financials[0].metric, "EBITDA");
    }

    #[tokio::test]
    async fn denied_budget_skips_the_call() {
        let (ex, stub) = extractor(StubVisionClient::new(), 1);
        let cancel = CancellationToken::new();
        assert!(ex.extract_page(&doc(), 1, &cancel).await.result.is_ok());
        let out = ex.extract_page(&doc(), 2, &cancel).await;
        assert!(out.is_budget_denied());
        assert_eq!(stub.calls(), vec![1]);
    }

    #[tokio::test]
    async fn render_failure_costs_nothing() {
        let guard = Arc::new(CostGuard::new(CostBudget::calls(1)));
        let ex = VisionExtractor::new(
            Arc::new(StubVisionClient::new()),
            Arc::new(BrokenRenderer),
            guard.clone(),
            Duration::from_secs(30),
        );
        let out = ex.extract_page(&doc(), 1, &CancellationToken::new()).await;
        assert!(matches!(out.result, Err(PageError::RenderFailed { .. })));
        assert_eq!(guard.snapshot().consumed, 0);
    }

    #[tokio::test]
    async fn exhausted_guard_skips_rendering() {
        let renderer = Arc::new(CountingRenderer::default());
        let guard = Arc::new(CostGuard::new(CostBudget::calls(0)));
        assert!(!guard.charge_call());
        let ex = VisionExtractor::new(
            Arc::new(StubVisionClient::new()),
            renderer.clone(),
            guard,
            Duration::from_secs(30),
        );
        let out = ex.extract_page(&doc(), 3, &CancellationToken::new()).await;
        assert!(out.is_budget_denied());
        assert_eq!(renderer.renders.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reply_settles_reported_tokens() {
        let long = format!(r#"{{"narrative":{{"market":["{}"]}}}}"#, "x".repeat(8_000));
        let guard = Arc::new(CostGuard::new(CostBudget::tokens(50_000, 1_000)));
        let ex = VisionExtractor::new(
            Arc::new(StubVisionClient::new().with_reply(2, long)),
            Arc::new(WhitePage),
            guard.clone(),
            Duration::from_secs(30),
        );
        let out = ex.extract_page(&doc(), 2, &CancellationToken::new()).await;
        assert!(out.result.is_ok());
        let spent = (out.input_tokens + out.output_tokens) as u64;
        assert!(spent > 2_000);
        assert_eq!(guard.snapshot().consumed, spent);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_times_out() {
        let stub = StubVisionClient::new().with_delay(5, Duration::from_secs(60));
        let (ex, _) = extractor(stub, 5);
        let out = ex.extract_page(&doc(), 5, &CancellationToken::new()).await;
        assert!(matches!(out.result, Err(PageError::Timeout { page: 5, secs: 30 })));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_charging() {
        let (ex, stub) = extractor(StubVisionClient::new(), 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = ex.extract_page(&doc(), 1, &cancel).await;
        assert!(matches!(out.result, Err(PageError::Cancelled { page: 1 })));
        assert!(stub.calls().is_empty());
        assert_eq!(ex.guard().snapshot().consumed, 0);
    }

    #[test]
    fn array_reply_is_rejected() {
        assert!(parse_record("[1, 2, 3]").is_err());
    }
}
