//! Response sanitization: recover the JSON object from a model reply that
//! wrapped it in markup.
//!
//! Even when told to emit bare JSON, vision models regularly return
//! ` ```json ... ``` ` fences, a BOM, zero-width characters, or a sentence of
//! preamble. The parser tries the raw reply first and runs
//! [`sanitize_json_reply`] exactly once on failure.
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence and brace detection see clean
//! input; fences are stripped before brace trimming so a fenced object keeps
//! its own braces.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every sanitization rule, in order.
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens)
/// 3. Strip an outer code fence (` ``` `, ` ```json `, ` ```JSON `)
/// 4. Trim to the outermost `{ … }` span, dropping preamble and trailers
pub fn sanitize_json_reply(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    trim_to_object(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip invisible Unicode ──────────────────────────────────────────

const INVISIBLE: [char; 6] = [
    '\u{FEFF}', // BOM
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
    '\u{00AD}', // soft hyphen
];

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 4: Trim to the outermost object ─────────────────────────────────────

fn trim_to_object(input: &str) -> String {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => input[start..=end].to_string(),
        _ => input.trim().to_string(),
    }
}
