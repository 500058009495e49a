//! Category tables: what "high-value page" means, expressed as data.
//!
//! A [`Category`] pairs a signal list (keywords and regex patterns, each with
//! a weight) with a [`Priority`] tier and a page quota. Selection logic never
//! branches on category names; a new vertical is a new table, loaded with
//! [`CategoryTable::from_json_file`] or built in code.

use crate::error::Pdf2FactsError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Priority tier of a category. `P1` is filled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    /// All tiers, highest first.
    pub const ALL: [Priority; 3] = [Priority::P1, Priority::P2, Priority::P3];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        };
        f.write_str(s)
    }
}

/// How a [`Signal`] term is matched against page text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Case-insensitive whole-word match; a trailing plural `s` is tolerated.
    #[default]
    Keyword,
    /// Raw regular expression (matched case-insensitively).
    Pattern,
}

/// One weighted signal term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub term: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub kind: SignalKind,
}

fn default_weight() -> f64 {
    1.0
}

impl Signal {
    pub fn keyword(term: impl Into<String>, weight: f64) -> Self {
        Self {
            term: term.into(),
            weight,
            kind: SignalKind::Keyword,
        }
    }

    pub fn pattern(term: impl Into<String>, weight: f64) -> Self {
        Self {
            term: term.into(),
            weight,
            kind: SignalKind::Pattern,
        }
    }

    fn compile(&self) -> Result<Regex, regex::Error> {
        let source = match self.kind {
            SignalKind::Keyword => format!(r"(?i)\b{}s?\b", regex::escape(self.term.trim())),
            SignalKind::Pattern => format!("(?i){}", self.term),
        };
        Regex::new(&source)
    }
}

/// A content category with its signals, tier and quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub priority: Priority,
    /// Maximum number of pages this category may claim.
    pub quota: usize,
    pub signals: Vec<Signal>,
}

impl Category {
    pub fn new(name: impl Into<String>, priority: Priority, quota: usize, signals: Vec<Signal>) -> Self {
        Self {
            name: name.into(),
            priority,
            quota,
            signals,
        }
    }
}

/// An ordered set of categories. Order breaks ties between categories of the
/// same tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTable {
    pub categories: Vec<Category>,
}

/// A category with its signals compiled to regexes, ready for scoring.
#[derive(Debug, Clone)]
pub struct CompiledCategory {
    pub name: String,
    pub priority: Priority,
    pub quota: usize,
    pub(crate) matchers: Vec<(Regex, f64)>,
}

impl CategoryTable {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// Load a table from a JSON file of the form `{"categories": [...]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Pdf2FactsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Pdf2FactsError::CategoryTableInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a table from JSON text.
    pub fn from_json(raw: &str) -> Result<Self, Pdf2FactsError> {
        let table: CategoryTable = serde_json::from_str(raw)
            .map_err(|e| Pdf2FactsError::CategoryTableInvalid(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Check names are unique, quotas positive, signals present and compilable.
    pub fn validate(&self) -> Result<(), Pdf2FactsError> {
        if self.categories.is_empty() {
            return Err(Pdf2FactsError::CategoryTableInvalid(
                "table has no categories".into(),
            ));
        }
        let mut seen = HashSet::new();
        for cat in &self.categories {
            if cat.name.trim().is_empty() {
                return Err(Pdf2FactsError::CategoryTableInvalid(
                    "category with empty name".into(),
                ));
            }
            if !seen.insert(cat.name.as_str()) {
                return Err(Pdf2FactsError::CategoryTableInvalid(format!(
                    "duplicate category '{}'",
                    cat.name
                )));
            }
            if cat.quota == 0 {
                return Err(Pdf2FactsError::CategoryTableInvalid(format!(
                    "category '{}' has a zero quota",
                    cat.name
                )));
            }
            if cat.signals.is_empty() {
                return Err(Pdf2FactsError::CategoryTableInvalid(format!(
                    "category '{}' has no signals",
                    cat.name
                )));
            }
        }
        self.compile().map(|_| ())
    }

    /// Compile every signal into a case-insensitive regex.
    pub fn compile(&self) -> Result<Vec<CompiledCategory>, Pdf2FactsError> {
        self.categories
            .iter()
            .map(|cat| {
                let matchers = cat
                    .signals
                    .iter()
                    .map(|s| {
                        s.compile().map(|re| (re, s.weight)).map_err(|e| {
                            Pdf2FactsError::CategoryTableInvalid(format!(
                                "category '{}', signal '{}': {e}",
                                cat.name, s.term
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledCategory {
                    name: cat.name.clone(),
                    priority: cat.priority,
                    quota: cat.quota,
                    matchers,
                })
            })
            .collect()
    }
}

impl Default for CategoryTable {
    /// The investor-deck table: financials and competition are P1.
    fn default() -> Self {
        use Signal as S;
        Self::new(vec![
            Category::new(
                "financials",
                Priority::P1,
                3,
                vec![
                    S::keyword("revenue", 2.0),
                    S::keyword("ARR", 2.0),
                    S::keyword("MRR", 2.0),
                    S::keyword("EBITDA", 2.0),
                    S::keyword("gross margin", 2.0),
                    S::keyword("net income", 2.0),
                    S::keyword("profit", 1.5),
                    S::keyword("burn rate", 1.5),
                    S::keyword("runway", 1.5),
                    S::keyword("cash flow", 1.5),
                    S::keyword("income statement", 2.0),
                    S::keyword("balance sheet", 2.0),
                    S::keyword("P&L", 2.0),
                    S::keyword("forecast", 1.0),
                    S::keyword("projection", 1.0),
                    S::keyword("unit economics", 1.5),
                    S::keyword("CAC", 1.0),
                    S::keyword("LTV", 1.0),
                    S::keyword("valuation", 1.0),
                    S::pattern(r"[$€£]\s?\d[\d,.]*\s?(k|m|mm|bn|b|million|billion)?\b", 1.0),
                    S::pattern(r"\b(fy|q[1-4])\s?'?\d{2,4}\b", 0.5),
                ],
            ),
            Category::new(
                "competition",
                Priority::P1,
                3,
                vec![
                    S::pattern(r"\bcompetit\w*", 2.0),
                    S::keyword("competitive landscape", 2.0),
                    S::keyword("market share", 1.5),
                    S::keyword("incumbent", 1.5),
                    S::keyword("alternative", 1.0),
                    S::keyword("differentiation", 1.5),
                    S::keyword("moat", 1.5),
                    S::keyword("positioning", 1.0),
                    S::pattern(r"\bvs\.?\s", 1.0),
                    S::keyword("versus", 1.0),
                ],
            ),
            Category::new(
                "market",
                Priority::P2,
                2,
                vec![
                    S::keyword("market size", 2.0),
                    S::keyword("TAM", 2.0),
                    S::keyword("SAM", 1.5),
                    S::keyword("SOM", 1.5),
                    S::keyword("CAGR", 1.5),
                    S::keyword("addressable market", 2.0),
                    S::keyword("industry", 1.0),
                    S::keyword("segment", 0.5),
                ],
            ),
            Category::new(
                "traction",
                Priority::P2,
                2,
                vec![
                    S::keyword("traction", 2.0),
                    S::keyword("customer", 1.0),
                    S::keyword("user", 0.5),
                    S::keyword("retention", 1.5),
                    S::keyword("churn", 1.5),
                    S::keyword("pipeline", 1.0),
                    S::keyword("pilot", 1.0),
                    S::keyword("partnership", 1.0),
                    S::keyword("MoM", 1.5),
                    S::keyword("YoY", 1.5),
                    S::keyword("download", 0.5),
                ],
            ),
            Category::new(
                "team",
                Priority::P3,
                1,
                vec![
                    S::keyword("founder", 2.0),
                    S::keyword("co-founder", 2.0),
                    S::keyword("CEO", 1.5),
                    S::keyword("CTO", 1.5),
                    S::keyword("CFO", 1.5),
                    S::keyword("team", 1.0),
                    S::keyword("advisor", 1.0),
                    S::keyword("board", 0.5),
                    S::keyword("previously", 0.5),
                ],
            ),
            Category::new(
                "risks",
                Priority::P3,
                1,
                vec![
                    S::keyword("risk", 2.0),
                    S::keyword("regulatory", 1.5),
                    S::keyword("compliance", 1.0),
                    S::keyword("litigation", 1.5),
                    S::keyword("uncertainty", 1.0),
                    S::keyword("dependency", 1.0),
                    S::keyword("mitigation", 1.0),
                ],
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid() {
        let table = CategoryTable::default();
        table.validate().expect("default table must validate");
        let p1: Vec<&str> = table
            .categories
            .iter()
            .filter(|c| c.priority == Priority::P1)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(p1, vec!["financials", "competition"]);
        assert_eq!(table.get("competition").map(|c| c.quota), Some(3));
    }

    #[test]
    fn keyword_matches_plural_and_ignores_case() {
        let re = Signal::keyword("competitor", 1.0).compile().unwrap();
        assert!(re.is_match("Our COMPETITORS are slow"));
        assert!(!re.is_match("noncompetitorial"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let cat = Category::new("a", Priority::P1, 1, vec![Signal::keyword("x", 1.0)]);
        let table = CategoryTable::new(vec![cat.clone(), cat]);
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }

    #[test]
    fn zero_quota_rejected() {
        let table = CategoryTable::new(vec![Category::new(
            "a",
            Priority::P2,
            0,
            vec![Signal::keyword("x", 1.0)],
        )]);
        assert!(table.validate().is_err());
    }

    #[test]
    fn bad_pattern_rejected() {
        let table = CategoryTable::new(vec![Category::new(
            "a",
            Priority::P2,
            1,
            vec![Signal::pattern("(unclosed", 1.0)],
        )]);
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("(unclosed"), "got: {err}");
    }

    #[test]
    fn loads_from_json_with_defaults() {
        let raw = r#"{
            "categories": [
                {"name": "clinical", "priority": "P1", "quota": 2,
                 "signals": [{"term": "trial"}, {"term": "phase\\s+(i|ii|iii)", "kind": "pattern", "weight": 3.0}]}
            ]
        }"#;
        let table = CategoryTable::from_json(raw).unwrap();
        let cat = table.get("clinical").unwrap();
        assert_eq!(cat.signals[0].weight, 1.0);
        assert_eq!(cat.signals[0].kind, SignalKind::Keyword);
        assert_eq!(cat.signals[1].kind, SignalKind::Pattern);
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        let json = serde_json::to_string(&CategoryTable::default()).unwrap();
        std::fs::write(&path, json).unwrap();
        let table = CategoryTable::from_json_file(&path).unwrap();
        assert_eq!(table, CategoryTable::default());
    }
}
