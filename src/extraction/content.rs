//! Email content optimization for the extraction prompt.
//!
//! Backends truncate long prompts, so the body is aggressively slimmed
//! before it is embedded: signatures and legal boilerplate go, lines that
//! look like money stay, and the result is capped.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Lines beyond this many kept "context" lines must earn their place by
/// containing money-shaped content.
const CONTEXT_LINE_BUDGET: usize = 10;

/// Marker appended when the cap truncates content.
const TRUNCATION_MARKER: &str = "... [content truncated]";

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static PRICE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+[.,]\d+").unwrap());
static MOBILE_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(sent from my|get outlook for)").unwrap());
static LEGAL_BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(confidentiality notice|this email and any attachments|the information in this email)",
    )
    .unwrap()
});

const INVOICE_WORDS: &[&str] = &[
    "invoice", "bill", "amount", "total", "paid", "due", "charge",
];

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Slim an email body down to the lines worth sending to the backend,
/// capped at `max_chars`.
pub fn optimize_content(body: &str, max_chars: usize) -> String {
    let stripped = strip_noise(body);

    let mut relevant: Vec<&str> = Vec::new();
    for line in stripped.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_money_line(line) || relevant.len() < CONTEXT_LINE_BUDGET {
            relevant.push(line);
        }
    }

    let mut result = relevant.join("\n");
    if result.len() > max_chars {
        let mut cut = max_chars;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
        result.push_str(TRUNCATION_MARKER);
    }

    debug!(
        original_chars = body.len(),
        optimized_chars = result.len(),
        "Content optimized for extraction"
    );
    result
}

/// Whether a line carries a money signal: a currency symbol, an invoice
/// keyword, or a price-shaped number.
fn is_money_line(line: &str) -> bool {
    if line.chars().any(|c| CURRENCY_SYMBOLS.contains(&c)) {
        return true;
    }
    let lower = line.to_lowercase();
    if INVOICE_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }
    PRICE_NUMBER.is_match(line)
}

/// Drop signatures, legal footers and HTML tags.
fn strip_noise(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();

        // "-- " delimiter starts the signature; everything after goes.
        if trimmed == "--" {
            break;
        }
        // Disclaimers run to the end of the message.
        if LEGAL_BOILERPLATE.is_match(trimmed) {
            break;
        }
        if MOBILE_SIGNATURE.is_match(trimmed) {
            continue;
        }
        kept.push(line);
    }

    let joined = kept.join("\n");
    HTML_TAG.replace_all(&joined, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_money_lines_from_long_body() {
        let mut body = String::new();
        for i in 0..40 {
            body.push_str(&format!("filler line number {i} with plain words\n"));
        }
        body.push_str("Total: $39.00\n");

        let out = optimize_content(&body, 1500);
        assert!(out.contains("Total: $39.00"));
        // Only the context budget of filler survives.
        assert!(!out.contains("filler line number 30"));
    }

    #[test]
    fn strips_signature_block() {
        let body = "Your invoice total is $10\n--\nAlice Smith\nVP of Everything";
        let out = optimize_content(body, 1500);
        assert!(out.contains("$10"));
        assert!(!out.contains("Alice Smith"));
    }

    #[test]
    fn strips_mobile_signatures_and_disclaimers() {
        let body = "Amount due: 42.50\nSent from my iPhone\nConfidentiality Notice: this message is private\nnever seen";
        let out = optimize_content(body, 1500);
        assert!(out.contains("42.50"));
        assert!(!out.contains("iPhone"));
        assert!(!out.contains("never seen"));
    }

    #[test]
    fn strips_html_tags() {
        let body = "<p>Invoice <b>total</b>: $99.00</p>";
        let out = optimize_content(body, 1500);
        assert!(!out.contains('<'));
        assert!(out.contains("$99.00"));
    }

    #[test]
    fn caps_length_with_marker() {
        let body = "charge of 12.34 dollars\n".repeat(200);
        let out = optimize_content(&body, 300);
        assert!(out.len() <= 300 + TRUNCATION_MARKER.len());
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn short_body_passes_through() {
        let out = optimize_content("Thanks for your payment of $5", 1500);
        assert_eq!(out, "Thanks for your payment of $5");
    }

    #[test]
    fn money_line_detection() {
        assert!(is_money_line("Total due: $4"));
        assert!(is_money_line("your INVOICE is attached"));
        assert!(is_money_line("price was 1,99 last month"));
        assert!(!is_money_line("see you at the meeting"));
    }
}
