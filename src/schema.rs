//! The extraction schema and its merge operation.
//!
//! [`ExtractionRecord`] is what one vision call returns for one page.
//! [`MergedResult`] is the cumulative union of every record for a document,
//! and the only structure downstream features read.
//!
//! ## Merge rules
//!
//! | Field | Rule |
//! |-------|------|
//! | `financials` | union, deduplicated by (metric, value, period, page) |
//! | `narrative`  | per-category union, deduplicated by normalised text |
//! | `company`    | scalar; the value from the lowest source page wins |
//! | `pages_covered` | set union |
//! | `extra` (any other keys) | recursive: objects merge key-wise, arrays union, scalars keep the smaller value |
//!
//! Every list is held in a canonical order, which makes the merge
//! commutative, associative and idempotent: the same records merged in any
//! order, any number of times, produce the same result.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ── Per-page record ──────────────────────────────────────────────────────

/// One financial line item as printed on the page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinancialFact {
    /// What is measured ("Revenue", "Gross margin", "Runway").
    pub metric: String,
    /// The value exactly as shown ("$4.2M", "68%").
    pub value: String,
    /// Parsed numeric value, when the model could read one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Currency or unit ("USD", "%", "months").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Period the value refers to ("FY2023", "Q2 2024").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    /// 1-based page the fact was read from. Required for a valid fact.
    #[serde(default, deserialize_with = "deserialize_page")]
    pub page: Option<usize>,
}

impl FinancialFact {
    fn dedupe_key(&self) -> (usize, String, String, String) {
        (
            self.page.unwrap_or(0),
            normalise(&self.metric),
            normalise(&self.value).replace(' ', ""),
            self.period.as_deref().map(normalise).unwrap_or_default(),
        )
    }

    /// Full ordering: dedupe key first, then every remaining field, so the
    /// survivor of a duplicate group does not depend on arrival order.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.dedupe_key().cmp(&other.dedupe_key()).then_with(|| {
            let a = serde_json::to_string(self).unwrap_or_default();
            let b = serde_json::to_string(other).unwrap_or_default();
            a.cmp(&b)
        })
    }
}

/// Structured output of one vision call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub financials: Vec<FinancialFact>,
    /// Narrative category → short factual statements.
    #[serde(default)]
    pub narrative: BTreeMap<String, Vec<String>>,
    /// Scalar company profile fields (name, sector, stage, location, ask).
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub company: BTreeMap<String, String>,
    /// Pages the model says this record covers.
    #[serde(default, deserialize_with = "deserialize_pages")]
    pub pages_covered: Vec<usize>,
    /// Any other top-level keys the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of validating a record against the schema's invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Validation {
    /// Financial facts dropped for lacking a usable page reference.
    pub rejected_facts: usize,
    /// Covered-page entries dropped as out of range.
    pub rejected_pages: usize,
}

impl ExtractionRecord {
    /// Enforce the schema invariants in place.
    ///
    /// * Financial facts without a page reference in `1..=page_count` are
    ///   dropped.
    /// * `pages_covered` is clamped to the document, sorted, deduplicated,
    ///   and defaults to `[requested_page]` when the model left it empty.
    pub fn validate(&mut self, requested_page: usize, page_count: usize) -> Validation {
        let in_range = |p: usize| p >= 1 && p <= page_count;

        let before = self.financials.len();
        self.financials.retain(|f| f.page.is_some_and(in_range));
        let rejected_facts = before - self.financials.len();

        let before = self.pages_covered.len();
        self.pages_covered.retain(|&p| in_range(p));
        let rejected_pages = before - self.pages_covered.len();
        self.pages_covered.sort_unstable();
        self.pages_covered.dedup();
        if self.pages_covered.is_empty() && in_range(requested_page) {
            self.pages_covered.push(requested_page);
        }

        for items in self.narrative.values_mut() {
            items.retain(|s| !s.trim().is_empty());
        }
        self.narrative.retain(|_, items| !items.is_empty());

        if rejected_facts > 0 || rejected_pages > 0 {
            debug!(
                "Page {}: rejected {} facts without page reference, {} out-of-range pages",
                requested_page, rejected_facts, rejected_pages
            );
        }

        Validation {
            rejected_facts,
            rejected_pages,
        }
    }

    /// Lowest covered page; the provenance used for scalar conflicts.
    fn source_page(&self) -> usize {
        self.pages_covered.iter().copied().min().unwrap_or(usize::MAX)
    }
}

// ── Merged result ────────────────────────────────────────────────────────

/// A scalar value and the page it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedValue {
    pub value: String,
    pub page: usize,
}

impl SourcedValue {
    fn rank(&self) -> (usize, &str) {
        (self.page, self.value.as_str())
    }
}

/// The cumulative structured extraction for one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergedResult {
    pub financials: Vec<FinancialFact>,
    pub narrative: BTreeMap<String, Vec<String>>,
    pub company: BTreeMap<String, SourcedValue>,
    pub pages_covered: BTreeSet<usize>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Cascade text for strategic pages that never got a vision extraction.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text_fallback: BTreeMap<usize, String>,
}

impl MergedResult {
    /// Lift a single validated record into a merged result.
    pub fn from_record(record: &ExtractionRecord) -> Self {
        let source_page = record.source_page();
        let mut out = MergedResult {
            financials: record.financials.clone(),
            narrative: record.narrative.clone(),
            company: record
                .company
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| {
                    (
                        k.clone(),
                        SourcedValue {
                            value: v.trim().to_string(),
                            page: source_page,
                        },
                    )
                })
                .collect(),
            pages_covered: record.pages_covered.iter().copied().collect(),
            extra: Map::new(),
            text_fallback: BTreeMap::new(),
        };
        for (k, v) in &record.extra {
            out.extra.insert(k.clone(), canonicalise(v.clone()));
        }
        out.canonicalise_lists();
        out
    }

    /// Merge one record into the result.
    pub fn merge_record(&mut self, record: &ExtractionRecord) {
        self.merge(&MergedResult::from_record(record));
    }

    /// Merge another result into this one.
    pub fn merge(&mut self, other: &MergedResult) {
        self.financials.extend(other.financials.iter().cloned());

        for (category, items) in &other.narrative {
            self.narrative
                .entry(category.clone())
                .or_default()
                .extend(items.iter().cloned());
        }

        for (key, incoming) in &other.company {
            match self.company.get(key) {
                Some(existing) if existing.rank() <= incoming.rank() => {}
                _ => {
                    self.company.insert(key.clone(), incoming.clone());
                }
            }
        }

        self.pages_covered.extend(other.pages_covered.iter().copied());

        for (key, value) in &other.extra {
            match self.extra.get_mut(key) {
                Some(existing) => merge_json(existing, value),
                None => {
                    self.extra.insert(key.clone(), canonicalise(value.clone()));
                }
            }
        }

        for (page, text) in &other.text_fallback {
            match self.text_fallback.get(page) {
                Some(existing) if (existing.len(), existing.as_str()) >= (text.len(), text.as_str()) => {}
                _ => {
                    self.text_fallback.insert(*page, text.clone());
                }
            }
        }

        self.canonicalise_lists();
    }

    fn canonicalise_lists(&mut self) {
        self.financials.sort_by(FinancialFact::canonical_cmp);
        self.financials
            .dedup_by(|b, a| a.dedupe_key() == b.dedupe_key());

        for items in self.narrative.values_mut() {
            items.iter_mut().for_each(|s| *s = s.trim().to_string());
            items.retain(|s| !s.is_empty());
            items.sort_by(|a, b| normalise(a).cmp(&normalise(b)).then_with(|| a.cmp(b)));
            items.dedup_by(|b, a| normalise(a) == normalise(b));
        }
        self.narrative.retain(|_, items| !items.is_empty());
    }

    /// Facts whose metric matches `metric` (case- and whitespace-insensitive).
    pub fn facts_for_metric(&self, metric: &str) -> Vec<&FinancialFact> {
        let wanted = normalise(metric);
        self.financials
            .iter()
            .filter(|f| normalise(&f.metric) == wanted)
            .collect()
    }

    /// Narrative items for one category (empty when absent).
    pub fn narrative(&self, category: &str) -> &[String] {
        self.narrative.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn company_value(&self, key: &str) -> Option<&str> {
        self.company.get(key).map(|v| v.value.as_str())
    }

    /// True when nothing structured was extracted.
    pub fn is_empty(&self) -> bool {
        self.financials.is_empty()
            && self.narrative.is_empty()
            && self.company.is_empty()
            && self.extra.is_empty()
    }
}

// ── JSON helpers ─────────────────────────────────────────────────────────

fn normalise(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', ';', ','])
        .to_lowercase()
}

fn json_key(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

/// Sort and deduplicate every array, recursively.
fn canonicalise(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(canonicalise).collect();
            items.sort_by_key(json_key);
            items.dedup();
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonicalise(v)))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// Recursive merge of two canonical JSON values.
fn merge_json(into: &mut Value, from: &Value) {
    match (into, from) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                match a.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        a.insert(k.clone(), canonicalise(v.clone()));
                    }
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.extend(b.iter().cloned().map(canonicalise));
            a.sort_by_key(json_key);
            a.dedup();
        }
        (slot, incoming) => {
            let incoming = canonicalise(incoming.clone());
            let replace = match (&*slot, &incoming) {
                (Value::Null, _) => true,
                (_, Value::Null) => false,
                (cur, new) => json_key(new) < json_key(cur),
            };
            if replace {
                *slot = incoming;
            }
        }
    }
}

// ── Lenient deserialisers ────────────────────────────────────────────────

/// Parse a page reference given as `4`, `"4"`, `"p. 4"` or `"page 4"`.
fn page_from_value(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn deserialize_page<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(page_from_value))
}

fn deserialize_pages<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Array(items)) => items.iter().filter_map(page_from_value).collect(),
        Some(other) => page_from_value(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

/// Accept scalar values of any JSON type, stringifying numbers and bools and
/// dropping nulls and nested structures.
fn deserialize_scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(v.unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Number(n) => Some((k, n.to_string())),
            Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect())
}
