//! Strategic page selection under a hard page budget.
//!
//! ## Algorithm
//!
//! 1. Documents shorter than `min_pages` are selected whole.
//! 2. Pass 1 fills P1 categories round-robin, one page per category per
//!    round, until every P1 quota is met or candidates run out.
//! 3. Pass 2 does the same for P2, then P3, stopping at `page_cap`.
//! 4. If fewer than `min_pages` pages were chosen, the structural fallback
//!    adds pages at roughly 20/40/60/80% of the document, then the final
//!    pages, until the minimum is met.
//!
//! A page belongs to at most one category. Within a tier, categories first
//! draw only from pages where they are the page's *best* category, then from
//! any page where they score above zero. Candidates are ordered by score
//! descending, then page ascending.
//!
//! Every pick is recorded as a [`SelectionDecision`] and logged.

use crate::categories::Priority;
use crate::config::ExtractionConfig;
use crate::scoring::{ContentScorer, PageScores};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Relative positions tried by the structural fallback.
const FALLBACK_POSITIONS: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

/// Why a page was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Chosen for a category by score.
    Category,
    /// Chosen by relative position because scoring was inconclusive.
    StructuralFallback,
    /// The document is shorter than the minimum; every page is taken.
    SmallDocument,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionReason::Category => "category",
            SelectionReason::StructuralFallback => "structural fallback",
            SelectionReason::SmallDocument => "small document",
        })
    }
}

/// One recorded selection decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub page: usize,
    pub category: Option<String>,
    pub score: f64,
    pub reason: SelectionReason,
}

/// The bounded, prioritised page set for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Category → pages in pick order.
    pub by_category: BTreeMap<String, Vec<usize>>,
    /// Pages added by the structural fallback or the small-document rule.
    pub fallback: Vec<usize>,
    /// Every decision, in the order it was made.
    pub decisions: Vec<SelectionDecision>,
    pub total_pages: usize,
}

impl SelectionResult {
    /// Every selected page, ascending.
    pub fn pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.decisions.iter().map(|d| d.page).collect();
        pages.sort_unstable();
        pages
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.decisions.iter().any(|d| d.page == page)
    }

    /// Pages picked for `category`, in pick order.
    pub fn pages_for(&self, category: &str) -> &[usize] {
        self.by_category.get(category).map_or(&[], Vec::as_slice)
    }

    /// The category a page was picked for, if any.
    pub fn category_of(&self, page: usize) -> Option<&str> {
        self.decisions
            .iter()
            .find(|d| d.page == page)
            .and_then(|d| d.category.as_deref())
    }

    pub fn used_fallback(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.reason == SelectionReason::StructuralFallback)
    }

    fn push(&mut self, decision: SelectionDecision) {
        info!(
            "Selected page {} ({}{}, score {:.2})",
            decision.page,
            decision.reason,
            decision
                .category
                .as_deref()
                .map(|c| format!(": {c}"))
                .unwrap_or_default(),
            decision.score
        );
        match (&decision.reason, &decision.category) {
            (SelectionReason::Category, Some(cat)) => {
                self.by_category.entry(cat.clone()).or_default().push(decision.page)
            }
            _ => self.fallback.push(decision.page),
        }
        self.decisions.push(decision);
    }
}

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    priority: Priority,
    quota: usize,
}

/// Turns per-page scores into a [`SelectionResult`].
#[derive(Debug, Clone)]
pub struct PageSelector {
    slots: Vec<Slot>,
    page_cap: usize,
    min_pages: usize,
}

impl PageSelector {
    /// Build a selector over the scorer's categories (table order).
    pub fn new(scorer: &ContentScorer, page_cap: usize, min_pages: usize) -> Self {
        let slots = scorer
            .categories()
            .iter()
            .map(|c| Slot {
                name: c.name.clone(),
                priority: c.priority,
                quota: c.quota,
            })
            .collect();
        Self {
            slots,
            page_cap,
            min_pages: min_pages.min(page_cap),
        }
    }

    pub fn from_config(config: &ExtractionConfig, scorer: &ContentScorer) -> Self {
        Self::new(scorer, config.page_cap, config.min_pages)
    }

    /// Select strategic pages of a `total_pages`-page document.
    ///
    /// `scores` may be in any order; pages missing from it count as blank.
    pub fn select(&self, scores: &[PageScores], total_pages: usize) -> SelectionResult {
        let mut result = SelectionResult {
            total_pages,
            ..SelectionResult::default()
        };
        let by_page: BTreeMap<usize, &PageScores> = scores.iter().map(|s| (s.page, s)).collect();

        if total_pages < self.min_pages {
            for page in 1..=total_pages {
                let best = by_page.get(&page).and_then(|s| s.best());
                result.push(SelectionDecision {
                    page,
                    category: best.map(|b| b.category.clone()),
                    score: best.map_or(0.0, |b| b.score),
                    reason: SelectionReason::SmallDocument,
                });
            }
            return result;
        }

        let mut taken: BTreeSet<usize> = BTreeSet::new();
        for tier in Priority::ALL {
            self.fill_tier(tier, &by_page, &mut taken, &mut result);
        }
        let left_out: Vec<usize> = by_page
            .values()
            .filter(|s| s.best().is_some() && !taken.contains(&s.page))
            .map(|s| s.page)
            .collect();
        if !left_out.is_empty() {
            info!(
                "Scored pages left out by quota or page cap: {:?}",
                left_out
            );
        }

        if result.len() < self.min_pages {
            debug!(
                "Only {} scorable pages selected (minimum {}), using structural fallback",
                result.len(),
                self.min_pages
            );
            for page in fallback_order(total_pages) {
                if result.len() >= self.min_pages {
                    break;
                }
                if taken.insert(page) {
                    result.push(SelectionDecision {
                        page,
                        category: None,
                        score: 0.0,
                        reason: SelectionReason::StructuralFallback,
                    });
                }
            }
        }

        info!(
            "Selection: {} of {} pages ({} by category, {} by fallback)",
            result.len(),
            total_pages,
            result.len() - result.fallback.len(),
            result.fallback.len()
        );
        result
    }

    /// Round-robin over the categories of one priority tier: primary pages
    /// first, then any page with a positive score.
    fn fill_tier(
        &self,
        tier: Priority,
        by_page: &BTreeMap<usize, &PageScores>,
        taken: &mut BTreeSet<usize>,
        result: &mut SelectionResult,
    ) {
        let slots: Vec<&Slot> = self.slots.iter().filter(|s| s.priority == tier).collect();
        let mut filled: Vec<usize> = vec![0; slots.len()];

        for primary_only in [true, false] {
            let mut queues: Vec<Vec<(usize, f64)>> = slots
                .iter()
                .map(|slot| candidates(&slot.name, by_page, primary_only))
                .collect();
            loop {
                let mut progressed = false;
                for (i, slot) in slots.iter().enumerate() {
                    if result.len() >= self.page_cap {
                        return;
                    }
                    if filled[i] >= slot.quota {
                        continue;
                    }
                    let queue = &mut queues[i];
                    queue.retain(|(p, _)| !taken.contains(p));
                    if queue.is_empty() {
                        continue;
                    }
                    let (page, score) = queue.remove(0);
                    taken.insert(page);
                    filled[i] += 1;
                    progressed = true;
                    result.push(SelectionDecision {
                        page,
                        category: Some(slot.name.clone()),
                        score,
                        reason: SelectionReason::Category,
                    });
                }
                if !progressed {
                    break;
                }
            }
        }
    }
}

/// Candidate pages for a category, by score descending then page ascending.
/// With `primary_only`, only pages where the category ranks first.
fn candidates(
    category: &str,
    by_page: &BTreeMap<usize, &PageScores>,
    primary_only: bool,
) -> Vec<(usize, f64)> {
    let mut out: Vec<(usize, f64)> = by_page
        .values()
        .filter(|s| !primary_only || s.best().is_some_and(|b| b.category == category))
        .map(|s| (s.page, s.score_for(category)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
    out
}

/// Structural fallback order for an `n`-page document: the relative
/// positions first, then pages from the end backwards.
fn fallback_order(n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let positions = FALLBACK_POSITIONS
        .iter()
        .map(|f| ((n as f64 * f).round() as usize).clamp(1, n));
    for page in positions.chain((1..=n).rev()) {
        if !order.contains(&page) {
            order.push(page);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategoryTable;
    use crate::scoring::CategoryScore;

    fn scorer() -> ContentScorer {
        ContentScorer::new(&CategoryTable::default(), 40).unwrap()
    }

    fn selector() -> PageSelector {
        PageSelector::new(&scorer(), 7, 3)
    }

    fn blank(n: usize) -> Vec<PageScores> {
        (1..=n).map(|p| scorer().score_page(p, "")).collect()
    }

    fn scored(page: usize, category: &str, score: f64) -> PageScores {
        let mut s = scorer().score_page(page, "");
        for c in &mut s.ranked {
            if c.category == category {
                c.score = score;
            }
        }
        s.ranked
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        s
    }

    #[test]
    fn small_documents_select_everything() {
        for n in 0..3 {
            let r = selector().select(&blank(n), n);
            assert_eq!(r.pages(), (1..=n).collect::<Vec<_>>());
            assert!(r.decisions.iter().all(|d| d.reason == SelectionReason::SmallDocument));
        }
    }

    #[test]
    fn blank_document_uses_structural_fallback() {
        let r = selector().select(&blank(43), 43);
        assert_eq!(r.len(), 3);
        // round(43 × 0.2) = 9, × 0.4 = 17, × 0.6 = 26
        assert_eq!(r.pages(), vec![9, 17, 26]);
        assert!(r.used_fallback());
        assert!(r.by_category.is_empty());
    }

    #[test]
    fn fallback_on_three_page_document_still_fills_minimum() {
        let r = selector().select(&blank(3), 3);
        assert_eq!(r.pages(), vec![1, 2, 3]);
    }

    #[test]
    fn fallback_order_covers_every_page_once() {
        let order = fallback_order(5);
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        let order = fallback_order(43);
        assert_eq!(order.len(), 43);
        assert_eq!(&order[..6], &[9, 17, 26, 34, 43, 42]);
    }

    #[test]
    fn p1_categories_fill_before_lower_tiers() {
        let mut scores = blank(20);
        scores[2] = scored(3, "financials", 9.0);
        scores[3] = scored(4, "financials", 8.0);
        scores[6] = scored(7, "competition", 7.0);
        scores[7] = scored(8, "competition", 6.0);
        scores[10] = scored(11, "market", 50.0);
        scores[11] = scored(12, "team", 40.0);

        let r = selector().select(&scores, 20);

        assert_eq!(r.pages_for("financials"), &[3, 4]);
        assert_eq!(r.pages_for("competition"), &[7, 8]);
        assert_eq!(r.pages_for("market"), &[11]);
        assert_eq!(r.pages_for("team"), &[12]);
        let order: Vec<usize> = r.decisions.iter().map(|d| d.page).collect();
        assert_eq!(order, vec![3, 7, 4, 8, 11, 12]);
        assert!(!r.used_fallback());
    }

    #[test]
    fn quotas_and_cap_are_respected() {
        let scores: Vec<PageScores> = (1..=30)
            .map(|p| {
                let cat = ["financials", "competition", "market", "traction", "team", "risks"][p % 6];
                scored(p, cat, p as f64)
            })
            .collect();
        let r = selector().select(&scores, 30);
        assert_eq!(r.len(), 7);
        assert_eq!(r.pages_for("financials").len(), 3);
        assert_eq!(r.pages_for("competition").len(), 3);
        // One P2 slot remains after P1 takes six.
        assert_eq!(r.pages_for("market").len() + r.pages_for("traction").len(), 1);
        assert!(r.pages_for("team").is_empty());
    }

    #[test]
    fn two_financial_and_three_competitor_pages_are_all_selected() {
        let mut scores = blank(20);
        scores[3] = scored(4, "financials", 6.0);
        scores[10] = scored(11, "financials", 5.0);
        scores[6] = scored(7, "competition", 4.0);
        scores[11] = scored(12, "competition", 4.0);
        scores[14] = scored(15, "competition", 3.0);

        let r = selector().select(&scores, 20);

        assert_eq!(r.pages_for("financials"), &[4, 11]);
        assert_eq!(r.pages_for("competition"), &[7, 12, 15]);
        assert_eq!(r.pages(), vec![4, 7, 11, 12, 15]);
        assert!(!r.used_fallback());
    }

    #[test]
    fn one_scorable_page_is_topped_up_by_fallback() {
        let mut scores = blank(10);
        scores[1] = scored(2, "financials", 5.0);
        let r = selector().select(&scores, 10);
        assert_eq!(r.len(), 3);
        assert_eq!(r.pages_for("financials"), &[2]);
        // round(10 × 0.2) = 2 is taken; 4 and 6 follow.
        assert_eq!(r.fallback, vec![4, 6]);
    }

    #[test]
    fn page_is_claimed_by_one_category_only() {
        let mut s = scorer().score_page(5, "");
        s.ranked = vec![
            CategoryScore { category: "competition".into(), score: 4.0 },
            CategoryScore { category: "financials".into(), score: 3.0 },
        ];
        let r = selector().select(&[s], 5);
        assert_eq!(r.category_of(5), Some("competition"));
        assert_eq!(r.decisions.iter().filter(|d| d.page == 5).count(), 1);
    }
}
