//! The extraction session: one configuration, one cost guard, one cache.
//!
//! ```text
//! Document ─▶ text cascade ─▶ scoring ─▶ selection ─▶ vision passes ─▶ CacheEntry
//!              (always)                   (≤ cap)      (guarded)         (cached)
//! ```
//!
//! Every collaborator is chosen once, in [`ExtractionSessionBuilder::build`]:
//! the vision client (real provider or stub), the page renderer and the text
//! tiers. Nothing downstream branches on a mode flag.

use crate::cache::ExtractionCache;
use crate::config::ExtractionConfig;
use crate::coordinator::{CoordinatorState, MultiPassCoordinator};
use crate::cost::{BudgetSnapshot, CostGuard};
use crate::document::{Document, DocumentKey};
use crate::error::{PageError, Pdf2FactsError};
use crate::output::{CacheEntry, ExtractionMetadata, PageProfile, SelectionPlan};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::progress::ProgressCallback;
use crate::scoring::{ContentScorer, PageScores};
use crate::selection::{PageSelector, SelectionResult};
use crate::text::{PageText, TextExtractionCascade};
use crate::vision::{LlmVisionClient, VisionClient, VisionExtractor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builder for [`ExtractionSession`].
pub struct ExtractionSessionBuilder {
    config: ExtractionConfig,
    client: Option<Arc<dyn VisionClient>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    cascade: Option<TextExtractionCascade>,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl ExtractionSessionBuilder {
    /// Use this vision client instead of resolving a provider.
    pub fn vision_client(mut self, client: Arc<dyn VisionClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use this renderer instead of pdfium.
    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Use these text tiers instead of the standard cascade.
    pub fn text_cascade(mut self, cascade: TextExtractionCascade) -> Self {
        self.cascade = Some(cascade);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Tie the session to an outer cancellation token (a child is used, so
    /// cancelling the session never cancels the parent).
    pub fn cancellation_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = Some(parent.child_token());
        self
    }

    pub fn build(self) -> Result<ExtractionSession, Pdf2FactsError> {
        let config = self.config;
        let client: Arc<dyn VisionClient> = match self.client {
            Some(client) => client,
            None => Arc::new(LlmVisionClient::from_config(&config)?),
        };
        let renderer: Arc<dyn PageRenderer> = self
            .renderer
            .unwrap_or_else(|| Arc::new(PdfiumRenderer::new(&config)));
        let cascade = self
            .cascade
            .unwrap_or_else(|| TextExtractionCascade::standard(&config, Arc::clone(&renderer)));

        let scorer = ContentScorer::from_config(&config)?;
        let selector = PageSelector::from_config(&config, &scorer);
        let guard = Arc::new(CostGuard::new(config.budget));

        let mut extractor = VisionExtractor::new(
            client,
            renderer,
            Arc::clone(&guard),
            Duration::from_secs(config.page_timeout_secs),
        )
        .with_categories(config.categories.categories.iter().map(|c| c.name.clone()).collect());
        if let Some(prompt) = &config.system_prompt {
            extractor = extractor.with_system_prompt(prompt.clone());
        }
        let coordinator = MultiPassCoordinator::new(extractor, config.max_passes, config.concurrency)
            .with_progress(self.progress.clone());

        info!(
            "Session ready: text tiers {:?}, page cap {}, {} passes max, budget {} {}",
            cascade.tier_names(),
            config.page_cap,
            config.max_passes,
            config.budget.ceiling,
            config.budget.unit
        );

        Ok(ExtractionSession {
            config,
            cascade,
            scorer,
            selector,
            coordinator,
            guard,
            cache: ExtractionCache::new(),
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            progress: self.progress,
        })
    }
}

/// Owns every stage and the per-session shared state.
pub struct ExtractionSession {
    config: ExtractionConfig,
    cascade: TextExtractionCascade,
    scorer: ContentScorer,
    selector: PageSelector,
    coordinator: MultiPassCoordinator,
    guard: Arc<CostGuard>,
    cache: ExtractionCache,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl ExtractionSession {
    pub fn builder(config: ExtractionConfig) -> ExtractionSessionBuilder {
        ExtractionSessionBuilder {
            config,
            client: None,
            renderer: None,
            cascade: None,
            progress: None,
            cancel: None,
        }
    }

    /// A session with the real provider, pdfium and the standard cascade.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, Pdf2FactsError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract `document`, or return the cached result for its key.
    ///
    /// Only [`Pdf2FactsError::DocumentUnreadable`] (or a configuration
    /// error) fails; every other problem yields a possibly partial entry.
    pub async fn extract(&self, document: &Document) -> Result<Arc<CacheEntry>, Pdf2FactsError> {
        let entry = self
            .cache
            .get_or_build(document.key(), move || self.run(document))
            .await?;
        if entry.metadata.state == CoordinatorState::Cancelled {
            // Partial results from an aborted run are returned, not kept.
            self.cache.invalidate_entry(document.key(), &entry);
        }
        Ok(entry)
    }

    /// Open a local path or URL, then [`ExtractionSession::extract`] it.
    pub async fn extract_path(&self, input: &str) -> Result<Arc<CacheEntry>, Pdf2FactsError> {
        let document = Document::open(input, &self.config).await?;
        self.extract(&document).await
    }

    /// Drop any cached result for `document` and extract it again.
    pub async fn reload(&self, document: &Document) -> Result<Arc<CacheEntry>, Pdf2FactsError> {
        self.cache.invalidate(document.key());
        self.extract(document).await
    }

    pub fn invalidate(&self, key: &DocumentKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn cached(&self, key: &DocumentKey) -> Option<Arc<CacheEntry>> {
        self.cache.get(key)
    }

    pub fn cache(&self) -> &ExtractionCache {
        &self.cache
    }

    /// Stop issuing vision calls. Running extractions return what they have.
    pub fn cancel(&self) {
        info!("Session cancelled");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Session-wide budget consumption so far.
    pub fn budget(&self) -> BudgetSnapshot {
        self.guard.snapshot()
    }

    /// Text, scores and selection for `document`, without vision calls or
    /// caching.
    pub async fn plan(&self, document: &Document) -> Result<SelectionPlan, Pdf2FactsError> {
        let started = Instant::now();
        let (texts, scores, selection) = self.analyse(document).await?;
        Ok(SelectionPlan {
            key: document.key().clone(),
            pages: profiles(&texts, &scores, &selection, |_| false),
            selection,
            text_duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn analyse(
        &self,
        document: &Document,
    ) -> Result<(Vec<PageText>, Vec<PageScores>, SelectionResult), Pdf2FactsError> {
        let texts = self.cascade.extract(document).await?;
        if let Some(cb) = &self.progress {
            cb.on_text_extracted(texts.len(), texts.iter().filter(|t| !t.text.is_empty()).count());
        }
        let scores = self.scorer.score_pages(&texts);
        let selection = self.selector.select(&scores, document.page_count());
        if let Some(cb) = &self.progress {
            cb.on_selection(&selection.pages(), selection.used_fallback());
        }
        Ok((texts, scores, selection))
    }

    async fn run(&self, document: &Document) -> Result<CacheEntry, Pdf2FactsError> {
        let started = Instant::now();
        info!(
            "Extracting '{}' ({} pages, key {})",
            document.label(),
            document.page_count(),
            document.key()
        );

        let (texts, scores, selection) = self.analyse(document).await?;
        let text_duration_ms = started.elapsed().as_millis() as u64;

        let vision_start = Instant::now();
        let run_cancel = self.cancel.child_token();
        let coordinate = self.coordinator.run(document, &selection, &texts, &run_cancel);
        let outcome = match self.config.session_timeout_secs {
            Some(secs) => {
                let remaining = Duration::from_secs(secs).saturating_sub(started.elapsed());
                tokio::pin!(coordinate);
                tokio::select! {
                    outcome = &mut coordinate => outcome,
                    _ = tokio::time::sleep(remaining) => {
                        warn!("'{}': session timeout of {}s reached, cancelling", document.label(), secs);
                        run_cancel.cancel();
                        coordinate.await
                    }
                }
            }
            None => coordinate.await,
        };
        let vision_duration_ms = vision_start.elapsed().as_millis() as u64;

        let mut errors: Vec<PageError> = texts.iter().flat_map(|t| t.errors.iter().cloned()).collect();
        errors.extend(outcome.errors().cloned());

        let budget = self.guard.snapshot();
        if outcome.state == CoordinatorState::BudgetExhausted {
            warn!(
                "'{}': budget exhausted ({}/{} {}), {} strategic pages on text fallback",
                document.label(),
                budget.consumed,
                budget.ceiling,
                budget.unit,
                outcome.merged.text_fallback.len()
            );
        }

        let metadata = ExtractionMetadata {
            source: document.label().to_string(),
            total_pages: document.page_count(),
            pages_processed: outcome.vision_pages.iter().copied().collect(),
            passes: outcome.passes.len(),
            state: outcome.state,
            budget_exhausted: outcome.state == CoordinatorState::BudgetExhausted,
            budget,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            rejected_facts: outcome.rejected_facts,
            sanitized_replies: outcome.sanitized_replies,
            elapsed_ms: started.elapsed().as_millis() as u64,
            text_duration_ms,
            vision_duration_ms,
            errors,
            pass_reports: outcome.passes.clone(),
        };

        let pages = profiles(&texts, &scores, &selection, |p| outcome.vision_pages.contains(&p));
        let entry = CacheEntry {
            key: document.key().clone(),
            result: outcome.merged,
            selection,
            pages,
            metadata,
        };
        info!("{}", entry.summary());
        Ok(entry)
    }
}

fn profiles(
    texts: &[PageText],
    scores: &[PageScores],
    selection: &SelectionResult,
    vision: impl Fn(usize) -> bool,
) -> Vec<PageProfile> {
    texts
        .iter()
        .map(|t| PageProfile {
            page: t.page,
            text: t.text.clone(),
            text_tier: t.tier.clone(),
            scores: scores
                .iter()
                .find(|s| s.page == t.page)
                .map(|s| s.ranked.clone())
                .unwrap_or_default(),
            selected: selection.contains(t.page),
            vision: vision(t.page),
        })
        .collect()
}
