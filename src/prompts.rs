//! Prompts for vision-based fact extraction.
//!
//! Every prompt lives here so the instructions the model sees can be read and
//! tested in one place. Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the per-page
//! instruction is always generated.

/// Default system prompt: return one JSON object per page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a financial analyst extracting facts from one page of an investor document (pitch deck, financial report). The page is given as an image; charts, tables and screenshots are part of the content.

Return ONE JSON object and nothing else, with exactly these keys:

{
  "financials": [
    {"metric": "ARR", "value": "$4.2M", "amount": 4200000, "unit": "USD", "period": "FY2023", "page": 5}
  ],
  "narrative": {
    "<category>": ["one short factual statement", "..."]
  },
  "company": {"name": "...", "sector": "...", "stage": "...", "headquarters": "..."},
  "pages_covered": [5]
}

Rules:

1. FINANCIALS
   - One entry per figure printed on the page: revenue, ARR, MRR, margins, burn, runway, funding, valuation, unit economics, forecasts
   - "value" is the figure exactly as printed; "amount" is the plain number when it can be read unambiguously, otherwise omit it
   - Every entry MUST carry "page": the page number you are reading
   - Read numbers from charts only when axis labels or data labels make them certain

2. NARRATIVE
   - Use only the category names listed in the instruction
   - Short factual statements, one fact each; competitor names, market sizes, customers, team members and their roles, risks
   - Omit a category when the page says nothing about it

3. COMPANY
   - Only fields explicitly stated on the page; omit the rest

4. PAGES_COVERED
   - The page numbers whose content you actually extracted, normally just the page you were given

5. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary
   - Use empty lists or objects when the page holds no relevant facts"#;

/// Per-page user instruction sent alongside the page image.
pub fn page_instruction(page: usize, total_pages: usize, categories: &[&str]) -> String {
    format!(
        "This is page {page} of {total_pages}. Narrative categories: {}. \
         Extract the facts on this page as the JSON object described. \
         Tag every financial figure with \"page\": {page}.",
        categories.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_every_schema_key() {
        for key in ["financials", "narrative", "company", "pages_covered", "\"page\""] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(key), "missing {key}");
        }
    }

    #[test]
    fn instruction_carries_page_and_categories() {
        let s = page_instruction(5, 20, &["financials", "team"]);
        assert!(s.contains("page 5 of 20"));
        assert!(s.contains("financials, team"));
        assert!(s.contains("\"page\": 5"));
    }
}
