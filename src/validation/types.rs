//! Verdict types for the invoice validation engine.

use serde::{Deserialize, Serialize};

/// What kind of document an email turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    PaymentReceipt,
    /// Third-party processor chatter about a payment attempt. The only
    /// classification that is rejected outright.
    PaymentNotification,
    Statement,
    Unknown,
}

impl DocumentType {
    /// Stable string form for storage and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::PaymentReceipt => "payment_receipt",
            Self::PaymentNotification => "payment_notification",
            Self::Statement => "statement",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The validation engine's decision for one candidate, plus diagnostics.
///
/// Any entry in `errors` forces `should_save == false`; warnings
/// accumulate without blocking the save. `requires_manual_review` is
/// independent of `should_save` — a saved invoice can still ask for a
/// human look.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub should_save: bool,
    pub requires_manual_review: bool,
    pub classification: DocumentType,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationVerdict {
    /// A terminal rejection carrying one error.
    pub(crate) fn rejected(classification: DocumentType, error: String) -> Self {
        Self::rejected_all(classification, vec![error])
    }

    /// A terminal rejection carrying every collected error.
    pub(crate) fn rejected_all(classification: DocumentType, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            should_save: false,
            requires_manual_review: false,
            classification,
            errors,
            warnings: Vec::new(),
        }
    }
}
