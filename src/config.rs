//! Configuration types for hybrid fact extraction.
//!
//! Every knob lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The config is injected once into an
//! [`crate::session::ExtractionSession`]; no stage reads environment flags or
//! mode toggles of its own.

use crate::categories::CategoryTable;
use crate::error::Pdf2FactsError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for an extraction session.
///
/// # Example
/// ```rust
/// use edgequake_pdf2facts::{CostBudget, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .page_cap(7)
///     .max_passes(3)
///     .budget(CostBudget::calls(12))
///     .build()
///     .unwrap();
/// assert_eq!(config.min_pages, 3);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum number of strategic pages sent to the vision model. Default: 7.
    pub page_cap: usize,

    /// Minimum number of strategic pages; the structural fallback tops the
    /// selection up to this. Default: 3.
    pub min_pages: usize,

    /// Hard cap on vision passes. Default: 3.
    pub max_passes: usize,

    /// Per-vision-call timeout in seconds. Default: 30.
    pub page_timeout_secs: u64,

    /// Wall-clock limit for one document's extraction, in seconds. When it
    /// elapses the run is cancelled and returns what it has. Default: None.
    pub session_timeout_secs: Option<u64>,

    /// Number of vision calls in flight at once within a pass; at least 1.
    /// Default: 3.
    pub concurrency: usize,

    /// Session-wide ceiling on vision spend. Default: 20 calls.
    pub budget: CostBudget,

    /// Category/priority/quota table used by scoring and selection.
    pub categories: CategoryTable,

    /// Pages with fewer trimmed characters than this score zero in every
    /// category. Default: 40.
    pub min_text_chars: usize,

    /// Optical character recognition tier settings.
    pub ocr: OcrConfig,

    /// Rendering DPI used when rasterising a page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (extraction, not prose).
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            page_cap: 7,
            min_pages: 3,
            max_passes: 3,
            page_timeout_secs: 30,
            session_timeout_secs: None,
            concurrency: 3,
            budget: CostBudget::default(),
            categories: CategoryTable::default(),
            min_text_chars: 40,
            ocr: OcrConfig::default(),
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            password: None,
            system_prompt: None,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("page_cap", &self.page_cap)
            .field("min_pages", &self.min_pages)
            .field("max_passes", &self.max_passes)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("session_timeout_secs", &self.session_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("budget", &self.budget)
            .field("categories", &self.categories.categories.len())
            .field("min_text_chars", &self.min_text_chars)
            .field("ocr", &self.ocr)
            .field("dpi", &self.dpi)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn page_cap(mut self, n: usize) -> Self {
        self.config.page_cap = n;
        self
    }

    pub fn min_pages(mut self, n: usize) -> Self {
        self.config.min_pages = n;
        self
    }

    pub fn max_passes(mut self, n: usize) -> Self {
        self.config.max_passes = n;
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn session_timeout_secs(mut self, secs: u64) -> Self {
        self.config.session_timeout_secs = Some(secs);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn budget(mut self, budget: CostBudget) -> Self {
        self.config.budget = budget;
        self
    }

    pub fn categories(mut self, table: CategoryTable) -> Self {
        self.config.categories = table;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn ocr(mut self, ocr: OcrConfig) -> Self {
        self.config.ocr = ocr;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2FactsError> {
        let c = &self.config;
        if c.min_pages == 0 {
            return Err(Pdf2FactsError::InvalidConfig(
                "min_pages must be ≥ 1".into(),
            ));
        }
        if c.min_pages > c.page_cap {
            return Err(Pdf2FactsError::InvalidConfig(format!(
                "min_pages ({}) exceeds page_cap ({})",
                c.min_pages, c.page_cap
            )));
        }
        if c.max_passes == 0 {
            return Err(Pdf2FactsError::InvalidConfig(
                "max_passes must be ≥ 1".into(),
            ));
        }
        if c.page_timeout_secs == 0 {
            return Err(Pdf2FactsError::InvalidConfig(
                "page_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.session_timeout_secs == Some(0) {
            return Err(Pdf2FactsError::InvalidConfig(
                "session_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.budget.cost_per_call == 0 {
            return Err(Pdf2FactsError::InvalidConfig(
                "budget cost_per_call must be ≥ 1".into(),
            ));
        }
        c.categories.validate()?;
        Ok(self.config)
    }
}

// ── Budget ───────────────────────────────────────────────────────────────

/// What a [`CostBudget`] counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetUnit {
    /// One unit per vision call.
    #[default]
    Calls,
    /// Tokens reserved per call.
    Tokens,
    /// Micro-dollars (1e-6 USD) reserved per call.
    MicroUsd,
}

impl fmt::Display for BudgetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetUnit::Calls => "calls",
            BudgetUnit::Tokens => "tokens",
            BudgetUnit::MicroUsd => "µUSD",
        };
        f.write_str(s)
    }
}

/// Provider list price in micro-dollars per thousand tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub input_per_1k: u64,
    pub output_per_1k: u64,
}

/// Session-wide spending ceiling for vision calls.
///
/// Every call reserves `cost_per_call` units up front; a reservation that
/// would cross the ceiling is denied. Once the reply is in, the reservation
/// is replaced by what the call actually cost (see [`CostBudget::actual_cost`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBudget {
    pub unit: BudgetUnit,
    pub ceiling: u64,
    pub cost_per_call: u64,
    /// Token price for [`BudgetUnit::MicroUsd`] budgets. Without it a call is
    /// settled at its reservation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<TokenPrice>,
}

impl CostBudget {
    /// A budget of `n` vision calls.
    pub fn calls(n: u64) -> Self {
        Self {
            unit: BudgetUnit::Calls,
            ceiling: n,
            cost_per_call: 1,
            price: None,
        }
    }

    /// A token budget, reserving `per_call` tokens for each call.
    pub fn tokens(ceiling: u64, per_call: u64) -> Self {
        Self {
            unit: BudgetUnit::Tokens,
            ceiling,
            cost_per_call: per_call,
            price: None,
        }
    }

    /// A currency budget in micro-dollars, reserving `per_call` for each call.
    pub fn micro_usd(ceiling: u64, per_call: u64) -> Self {
        Self {
            unit: BudgetUnit::MicroUsd,
            ceiling,
            cost_per_call: per_call,
            price: None,
        }
    }

    pub fn with_price(mut self, price: TokenPrice) -> Self {
        self.price = Some(price);
        self
    }

    /// What a finished call cost, in budget units.
    pub fn actual_cost(&self, input_tokens: usize, output_tokens: usize) -> u64 {
        let (input, output) = (input_tokens as u64, output_tokens as u64);
        match (self.unit, self.price) {
            (BudgetUnit::Calls, _) => self.cost_per_call,
            (BudgetUnit::Tokens, _) => input.saturating_add(output),
            (BudgetUnit::MicroUsd, Some(p)) => input
                .saturating_mul(p.input_per_1k)
                .saturating_add(output.saturating_mul(p.output_per_1k))
                .div_ceil(1000),
            (BudgetUnit::MicroUsd, None) => self.cost_per_call,
        }
    }
}

impl Default for CostBudget {
    fn default() -> Self {
        Self::calls(20)
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Settings for the OCR text tier (tesseract CLI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Executable name or path. Default: `tesseract`.
    pub binary: String,
    /// Tesseract language code(s). Default: `eng`.
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl OcrConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.page_cap, 7);
        assert_eq!(c.min_pages, 3);
        assert_eq!(c.max_passes, 3);
        assert_eq!(c.page_timeout_secs, 30);
        assert_eq!(c.budget, CostBudget::calls(20));
    }

    #[test]
    fn min_above_cap_rejected() {
        let err = ExtractionConfig::builder()
            .page_cap(2)
            .min_pages(3)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds page_cap"), "got: {err}");
    }

    #[test]
    fn zero_passes_rejected() {
        assert!(ExtractionConfig::builder().max_passes(0).build().is_err());
    }

    #[test]
    fn zero_session_timeout_rejected() {
        assert!(ExtractionConfig::builder().session_timeout_secs(0).build().is_err());
        let c = ExtractionConfig::builder().session_timeout_secs(90).build().unwrap();
        assert_eq!(c.session_timeout_secs, Some(90));
        assert_eq!(ExtractionConfig::default().session_timeout_secs, None);
    }

    #[test]
    fn concurrency_floor_is_one() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn token_budget_reserves_per_call() {
        let b = CostBudget::tokens(10_000, 2_500);
        assert_eq!(b.unit, BudgetUnit::Tokens);
        assert_eq!(b.ceiling / b.cost_per_call, 4);
    }

    #[test]
    fn actual_cost_follows_the_unit() {
        assert_eq!(CostBudget::calls(5).actual_cost(900, 300), 1);
        assert_eq!(CostBudget::tokens(10_000, 2_000).actual_cost(900, 300), 1_200);
        let priced = CostBudget::micro_usd(1_000_000, 5_000).with_price(TokenPrice {
            input_per_1k: 400,
            output_per_1k: 1_600,
        });
        // 900 × 0.4 + 300 × 1.6 = 840 µUSD
        assert_eq!(priced.actual_cost(900, 300), 840);
        assert_eq!(CostBudget::micro_usd(1_000, 50).actual_cost(900, 300), 50);
    }

    #[test]
    fn zero_cost_per_call_rejected() {
        let budget = CostBudget {
            unit: BudgetUnit::MicroUsd,
            ceiling: 100,
            cost_per_call: 0,
            price: None,
        };
        assert!(ExtractionConfig::builder().budget(budget).build().is_err());
    }
}
