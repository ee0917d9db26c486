//! Response validator — structural acceptance of a normalized mapping.
//!
//! Decides whether the mapping is a genuine invoice candidate, a
//! confirmed non-invoice (the backend's explicit signal), or too
//! incomplete to use — in which case the orchestrator retries. Business
//! rules (duplicates, classification, plausibility) live in the
//! validation engine, not here.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::debug;

use crate::pipeline::types::InvoiceDate;

/// Structural confidence floor. Below this the backend's own signal is
/// noise and the attempt is retried.
const MIN_STRUCTURAL_CONFIDENCE: f32 = 0.2;

/// Most negative total accepted, to support refunds.
const REFUND_FLOOR: i64 = -10_000;

/// Vendor strings the backend emits when it has nothing real.
const VENDOR_PLACEHOLDERS: &[&str] = &["string", "unknown", ""];

/// Textual amounts that mean zero.
const FREE_AMOUNTS: &[&str] = &["free", "no charge", "complimentary"];

/// Date formats the backend has been observed to emit.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%Y/%m/%d",
];

/// Fields of an accepted extraction, before email metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedInvoice {
    pub vendor_name: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<InvoiceDate>,
    pub due_date: Option<InvoiceDate>,
    pub amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub total_amount: Decimal,
    pub currency: String,
    pub category: Option<String>,
    pub confidence_score: f32,
}

/// Structural decision over a normalized mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The mapping coerced cleanly into a candidate.
    Accept(ExtractedInvoice),
    /// `vendor_name` and `total_amount` are both null — the backend's
    /// explicit "not an invoice" signal. Authoritative; short-circuits
    /// retries.
    ConfirmedNonInvoice,
    /// Partial or unusable extraction; the caller should retry rather
    /// than reject outright.
    Incomplete { reason: String },
}

/// Validate a normalized mapping.
pub fn validate_response(map: &Map<String, Value>) -> ResponseOutcome {
    let vendor_raw = present(map.get("vendor_name"));
    let total_raw = present(map.get("total_amount"));

    match (&vendor_raw, &total_raw) {
        (None, None) => return ResponseOutcome::ConfirmedNonInvoice,
        (Some(_), None) => {
            return ResponseOutcome::Incomplete {
                reason: "vendor present but no total amount".into(),
            };
        }
        (None, Some(_)) => {
            return ResponseOutcome::Incomplete {
                reason: "total amount present but no vendor".into(),
            };
        }
        (Some(_), Some(_)) => {}
    }

    // Both checked above.
    let (vendor_value, total_value) = (vendor_raw.unwrap(), total_raw.unwrap());

    let vendor_name = match vendor_value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    let vendor_lower = vendor_name.to_lowercase();
    if VENDOR_PLACEHOLDERS.contains(&vendor_lower.as_str()) || vendor_name.chars().count() < 2 {
        return ResponseOutcome::Incomplete {
            reason: format!("vendor name is a placeholder: {vendor_name:?}"),
        };
    }

    let total_amount = match coerce_amount(total_value) {
        Ok(v) => v,
        Err(reason) => return ResponseOutcome::Incomplete { reason },
    };
    if total_amount < Decimal::from(REFUND_FLOOR) {
        return ResponseOutcome::Incomplete {
            reason: format!("amount below refund floor: {total_amount}"),
        };
    }

    let confidence_score = confidence(map.get("confidence_score"));
    if confidence_score < MIN_STRUCTURAL_CONFIDENCE {
        return ResponseOutcome::Incomplete {
            reason: format!("confidence below structural floor: {confidence_score}"),
        };
    }

    // `amount` defaults to the total when the backend found only one
    // figure. Unparseable secondary amounts are dropped, not fatal.
    let amount = present(map.get("amount"))
        .and_then(|v| coerce_amount(v).ok())
        .unwrap_or(total_amount);
    let tax_amount = present(map.get("tax_amount")).and_then(|v| match coerce_amount(v) {
        Ok(t) => Some(t),
        Err(reason) => {
            debug!(reason = %reason, "Dropping unparseable tax_amount");
            None
        }
    });

    let currency = present(map.get("currency"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "USD".to_string());

    ResponseOutcome::Accept(ExtractedInvoice {
        vendor_name,
        invoice_number: string_field(map, "invoice_number"),
        invoice_date: date_field(map, "invoice_date"),
        due_date: date_field(map, "due_date"),
        amount,
        tax_amount,
        total_amount,
        currency,
        category: string_field(map, "category"),
        confidence_score,
    })
}

/// Treat JSON null, `""`, and the literal string `"null"` as absent.
fn present(value: Option<&Value>) -> Option<&Value> {
    let value = value?;
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("null") => None,
        _ => Some(value),
    }
}

/// Coerce a JSON value into a monetary `Decimal`.
///
/// Strings are stripped of currency symbols, thousands separators and
/// whitespace first; "free"-style phrasing maps to zero.
pub fn coerce_amount(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .map_err(|e| format!("numeric amount out of range: {e}")),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(*c, '$' | '€' | '£' | '¥' | ','))
                .collect::<String>()
                .trim()
                .to_string();
            if FREE_AMOUNTS.contains(&cleaned.to_lowercase().as_str()) {
                return Ok(Decimal::ZERO);
            }
            cleaned
                .parse::<Decimal>()
                .map_err(|_| format!("amount not convertible to a number: {s:?}"))
        }
        other => Err(format!("amount has unsupported type: {other}")),
    }
}

/// Confidence with a default of 1.0 (absent means the backend offered no
/// signal, not a bad one), clamped to [0, 1]. Numeric strings are
/// tolerated.
fn confidence(value: Option<&Value>) -> f32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.unwrap_or(1.0).clamp(0.0, 1.0) as f32
}

/// A trimmed, non-empty string field. Numbers are stringified (backends
/// emit bare numeric invoice numbers).
fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match present(map.get(key))? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a date field leniently; strings that fit no known format are
/// carried as `Unparsed` for the validation engine to flag.
fn date_field(map: &Map<String, Value>, key: &str) -> Option<InvoiceDate> {
    let raw = present(map.get(key))?.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(parse_date(raw))
}

/// Try the known formats, then full ISO 8601 timestamps.
pub fn parse_date(raw: &str) -> InvoiceDate {
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return InvoiceDate::Parsed(date);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return InvoiceDate::Parsed(dt.date_naive());
    }
    InvoiceDate::Unparsed(raw.to_string())
}
