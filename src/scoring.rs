//! Keyword-density scoring of page text against the category table.
//!
//! A page's score for a category is the weighted number of signal hits per
//! hundred words:
//!
//! ```text
//! score = Σ weight(signal) × hits(signal) × 100 / max(words, 50)
//! ```
//!
//! The 50-word floor keeps a slide holding nothing but "Revenue" from
//! outranking a dense financial table. Pages whose trimmed text is shorter
//! than `min_text_chars` score zero everywhere; the selector treats them as
//! structural-fallback candidates only.

use crate::categories::{CategoryTable, CompiledCategory, Priority};
use crate::config::ExtractionConfig;
use crate::error::Pdf2FactsError;
use crate::text::PageText;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

const WORD_FLOOR: usize = 50;

/// One category's score on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
}

/// All category scores for one page, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageScores {
    pub page: usize,
    /// Ranked by score descending; equal scores keep category-table order.
    pub ranked: Vec<CategoryScore>,
}

impl PageScores {
    /// Score for `category`, zero when the category is unknown.
    pub fn score_for(&self, category: &str) -> f64 {
        self.ranked
            .iter()
            .find(|s| s.category == category)
            .map_or(0.0, |s| s.score)
    }

    /// Highest-scoring category with a positive score.
    pub fn best(&self) -> Option<&CategoryScore> {
        self.ranked.first().filter(|s| s.score > 0.0)
    }

    /// Whether every category scored zero.
    pub fn is_blank(&self) -> bool {
        self.best().is_none()
    }
}

/// Scores page text for every configured category.
#[derive(Debug, Clone)]
pub struct ContentScorer {
    categories: Vec<CompiledCategory>,
    min_text_chars: usize,
}

impl ContentScorer {
    pub fn new(table: &CategoryTable, min_text_chars: usize) -> Result<Self, Pdf2FactsError> {
        Ok(Self {
            categories: table.compile()?,
            min_text_chars,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Pdf2FactsError> {
        Self::new(&config.categories, config.min_text_chars)
    }

    /// Compiled categories in table order.
    pub fn categories(&self) -> &[CompiledCategory] {
        &self.categories
    }

    /// Priority and quota of a category, by name.
    pub fn category(&self, name: &str) -> Option<(Priority, usize)> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| (c.priority, c.quota))
    }

    /// Score a single page.
    pub fn score_page(&self, page: usize, text: &str) -> PageScores {
        let trimmed = text.trim();
        let scorable = trimmed.chars().count() >= self.min_text_chars;
        let words = trimmed.split_whitespace().count().max(WORD_FLOOR) as f64;

        let mut ranked: Vec<CategoryScore> = self
            .categories
            .iter()
            .map(|cat| {
                let score = if scorable {
                    let weighted: f64 = cat
                        .matchers
                        .iter()
                        .map(|(re, weight)| re.find_iter(trimmed).count() as f64 * weight)
                        .sum();
                    weighted * 100.0 / words
                } else {
                    0.0
                };
                CategoryScore {
                    category: cat.name.clone(),
                    score,
                }
            })
            .collect();

        // Stable sort: ties keep table order.
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        if let Some(best) = ranked.first().filter(|s| s.score > 0.0) {
            debug!("Page {} best category '{}' ({:.2})", page, best.category, best.score);
        }
        PageScores { page, ranked }
    }

    /// Score every page of a cascade result, in page order.
    pub fn score_pages(&self, pages: &[PageText]) -> Vec<PageScores> {
        let mut scores: Vec<PageScores> = pages.iter().map(|p| self.score_page(p.page, &p.text)).collect();
        scores.sort_by_key(|s| s.page);
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{Category, Signal};

    fn scorer() -> ContentScorer {
        ContentScorer::new(&CategoryTable::default(), 40).unwrap()
    }

    const FINANCIAL: &str = "Revenue grew to $4.2M ARR in 2023 with EBITDA margin improving. \
        Gross margin 71%, burn rate down, revenue per customer up.";

    #[test]
    fn financial_text_ranks_financials_first() {
        let s = scorer().score_page(4, FINANCIAL);
        assert_eq!(s.page, 4);
        assert_eq!(s.best().unwrap().category, "financials");
        assert!(s.score_for("financials") > s.score_for("team"));
    }

    #[test]
    fn near_empty_pages_score_zero_everywhere() {
        let s = scorer().score_page(1, "  Revenue  ");
        assert!(s.is_blank());
        assert!(s.ranked.iter().all(|c| c.score == 0.0));
    }

    #[test]
    fn zero_scores_keep_table_order() {
        let s = scorer().score_page(1, "");
        let names: Vec<&str> = s.ranked.iter().map(|c| c.category.as_str()).collect();
        let table: Vec<String> = CategoryTable::default().categories.into_iter().map(|c| c.name).collect();
        assert_eq!(names, table.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn weights_scale_scores() {
        let table = CategoryTable::new(vec![
            Category::new("light", Priority::P1, 1, vec![Signal::keyword("widget", 1.0)]),
            Category::new("heavy", Priority::P1, 1, vec![Signal::keyword("widget", 3.0)]),
        ]);
        let scorer = ContentScorer::new(&table, 1).unwrap();
        let s = scorer.score_page(1, "widget widget");
        assert_eq!(s.best().unwrap().category, "heavy");
        assert!((s.score_for("heavy") - 3.0 * s.score_for("light")).abs() < 1e-9);
    }

    #[test]
    fn unknown_category_scores_zero() {
        assert_eq!(scorer().score_page(1, FINANCIAL).score_for("weather"), 0.0);
    }

    #[test]
    fn score_pages_returns_page_order() {
        let pages = vec![
            PageText { page: 2, text: FINANCIAL.into(), tier: None, errors: vec![] },
            PageText { page: 1, text: String::new(), tier: None, errors: vec![] },
        ];
        let scores = scorer().score_pages(&pages);
        assert_eq!(scores.iter().map(|s| s.page).collect::<Vec<_>>(), vec![1, 2]);
    }
}
