//! Response normalizer — recovers a JSON object from free-text AI output.
//!
//! Backends are instructed to return a raw JSON object but routinely wrap
//! it in markdown fences, prepend commentary, or emit stray control
//! bytes. Recovery is layered: direct parse, then progressively looser
//! extraction strategies, each an independent pure function. The first
//! strategy whose candidate substring actually parses wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::NormalizationError;

/// How much of the raw response to keep in a `NormalizationError`.
const EXCERPT_CHARS: usize = 500;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\s*(\{.*?\})\s*```").unwrap());
static FENCED_ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```\s*(\{.*?\})\s*```").unwrap());

/// Normalize raw backend output into a JSON object mapping.
///
/// Never panics on malformed input; all failures come back as a
/// `NormalizationError` carrying a response excerpt for the logs.
pub fn normalize(raw: &str) -> Result<Map<String, Value>, NormalizationError> {
    let cleaned = sanitize(raw);

    if let Some(map) = parse_object(&cleaned) {
        return Ok(map);
    }

    let strategies: [(&str, fn(&str) -> Option<String>); 4] = [
        ("fenced_json", extract_fenced_json),
        ("fenced_any", extract_fenced_any),
        ("balanced_braces", extract_largest_balanced),
        ("outermost_braces", extract_outermost_braces),
    ];

    for (name, strategy) in strategies {
        let Some(candidate) = strategy(&cleaned) else {
            continue;
        };
        match parse_object(&candidate) {
            Some(map) => {
                debug!(strategy = name, "Recovered JSON object from response");
                return Ok(map);
            }
            None => {
                debug!(strategy = name, "Candidate substring did not parse, trying next");
            }
        }
    }

    Err(NormalizationError {
        raw_excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
    })
}

/// Replace control characters (0x00–0x1F, 0x7F–0x9F) with spaces and
/// collapse whitespace runs. Backends emit stray control bytes that
/// break strict JSON parsing.
fn sanitize(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            let code = c as u32;
            if code <= 0x1F || (0x7F..=0x9F).contains(&code) {
                ' '
            } else {
                c
            }
        })
        .collect();

    let mut out = String::with_capacity(replaced.len());
    let mut last_was_space = false;
    for c in replaced.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Strict parse, accepting only a top-level JSON object.
fn parse_object(s: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Content of a code fence explicitly labeled `json`.
fn extract_fenced_json(s: &str) -> Option<String> {
    FENCED_JSON
        .captures(s)
        .map(|c| c[1].trim().to_string())
}

/// Content of any code fence that holds a brace-delimited body.
fn extract_fenced_any(s: &str) -> Option<String> {
    FENCED_ANY.captures(s).map(|c| c[1].trim().to_string())
}

/// The largest balanced-brace substring, found with a single depth-
/// counting scan. Braces inside JSON strings are not special-cased;
/// invoice payloads do not contain them in practice, and a bad candidate
/// simply fails to parse and falls through.
fn extract_largest_balanced(s: &str) -> Option<String> {
    let mut best: Option<(usize, usize)> = None;
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let end = i + c.len_utf8();
                        let longer = best.is_none_or(|(bs, be)| end - start > be - bs);
                        if longer {
                            best = Some((start, end));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(bs, be)| s[bs..be].to_string())
}

/// Last resort: the span from the first `{` to the last `}`.
fn extract_outermost_braces(s: &str) -> Option<String> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(s[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_object_parses() {
        let map = normalize(r#"{"vendor_name": "GitHub", "total_amount": 4.0}"#).unwrap();
        assert_eq!(map["vendor_name"], "GitHub");
    }

    #[test]
    fn labeled_fence_recovered() {
        let raw = "Here is the result:\n```json\n{\"vendor_name\": null, \"total_amount\": null}\n```";
        let map = normalize(raw).unwrap();
        assert!(map["vendor_name"].is_null());
        assert!(map["total_amount"].is_null());
    }

    #[test]
    fn unlabeled_fence_recovered() {
        let raw = "```\n{\"vendor_name\": \"Zoom\", \"total_amount\": 14.99}\n```";
        let map = normalize(raw).unwrap();
        assert_eq!(map["vendor_name"], "Zoom");
    }

    #[test]
    fn embedded_object_recovered() {
        let raw = "Based on the email: {\"vendor_name\": \"Slack\", \"total_amount\": 8} done.";
        let map = normalize(raw).unwrap();
        assert_eq!(map["vendor_name"], "Slack");
    }

    #[test]
    fn nested_object_recovered_whole() {
        let raw = r#"Sure: {"vendor_name": "AWS", "total_amount": 120.0, "meta": {"region": "us-east-1"}} end"#;
        let map = normalize(raw).unwrap();
        assert_eq!(map["meta"]["region"], "us-east-1");
    }

    #[test]
    fn control_characters_stripped() {
        let raw = "{\"vendor_name\":\u{0001} \"Datadog\",\n\"total_amount\":\t200}";
        let map = normalize(raw).unwrap();
        assert_eq!(map["vendor_name"], "Datadog");
    }

    #[test]
    fn newlines_inside_object_collapse() {
        let raw = "{\n  \"vendor_name\": \"GitHub\",\n  \"total_amount\": 4\n}";
        let map = normalize(raw).unwrap();
        assert_eq!(map["total_amount"], 4);
    }

    #[test]
    fn truncated_object_fails_with_excerpt() {
        let raw = r#"{"vendor_name": "GitHub", "total_a"#;
        let err = normalize(raw).unwrap_err();
        assert!(err.raw_excerpt.contains("GitHub"));
    }

    #[test]
    fn excerpt_capped_at_500_chars() {
        let raw = "x".repeat(2000);
        let err = normalize(&raw).unwrap_err();
        assert_eq!(err.raw_excerpt.chars().count(), 500);
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(normalize("[1, 2, 3]").is_err());
        assert!(normalize("\"just a string\"").is_err());
    }

    #[test]
    fn empty_input_fails() {
        assert!(normalize("").is_err());
        assert!(normalize("no braces here at all").is_err());
    }

    // ── Individual strategy layers ──────────────────────────────────

    #[test]
    fn fenced_json_layer_only_matches_labeled() {
        assert!(extract_fenced_json("```json {\"a\": 1} ```").is_some());
        assert!(extract_fenced_json("``` {\"a\": 1} ```").is_none());
    }

    #[test]
    fn balanced_layer_prefers_largest() {
        let s = "noise {\"a\": 1} more {\"b\": 1, \"c\": {\"d\": 2}} tail";
        let got = extract_largest_balanced(s).unwrap();
        assert!(got.contains("\"c\""));
    }

    #[test]
    fn balanced_layer_ignores_unopened_close() {
        assert_eq!(extract_largest_balanced("} {\"a\": 1}").unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn outermost_layer_spans_first_to_last() {
        let got = extract_outermost_braces("x {\"a\": 1} y {\"b\": 2} z").unwrap();
        assert_eq!(got, "{\"a\": 1} y {\"b\": 2}");
    }

    #[test]
    fn outermost_layer_rejects_reversed_braces() {
        assert!(extract_outermost_braces("} {").is_none());
    }
}
