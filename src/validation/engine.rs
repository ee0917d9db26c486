//! Invoice validation engine — the ordered rule pipeline.
//!
//! Rules run in a fixed order because later rules assume earlier ones
//! passed (classification reads fields the required-field check
//! guarantees). Duplicate checks and the payment-notification
//! classification are terminal; business and quality checks accumulate
//! warnings and may flag manual review. The engine's duplicate checks
//! are the fast path — the store's unique constraints are the actual
//! correctness guarantee under concurrent scans.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::pipeline::types::{CandidateInvoice, InvoiceDate};
use crate::store::traits::InvoiceStore;
use crate::validation::types::{DocumentType, ValidationVerdict};

/// Below this, the backend's confidence is treated as a hard rejection.
const CONFIDENCE_REJECT_FLOOR: f32 = 0.5;
/// Between the reject floor and this, the record saves but asks for a
/// human look.
const CONFIDENCE_REVIEW_FLOOR: f32 = 0.7;

/// Invoices older than this many days are suspicious.
const MAX_INVOICE_AGE_DAYS: i64 = 730;

/// Subject keywords that mark third-party payment processor chatter.
const PAYMENT_NOTIFICATION_KEYWORDS: &[&str] = &[
    "payment processed",
    "payment notification",
    "billing notification",
    "unsuccessful payment",
    "payment failed",
    "transfi payment",
    "payment received",
    "payment confirmation",
];

/// Subject keywords that mark a payment receipt.
const PAYMENT_RECEIPT_KEYWORDS: &[&str] = &[
    "payment receipt",
    "payment confirmation",
    "transaction confirmation",
    "billing receipt",
    "receipt for payment",
    "thank you for your payment",
];

/// Subject keywords that mark a genuine invoice.
const INVOICE_KEYWORDS: &[&str] = &[
    "invoice",
    "bill",
    "statement",
    "amount due",
    "please pay",
    "billing statement",
    "monthly bill",
];

/// Known third-party payment processors.
const PAYMENT_PROCESSORS: &[&str] = &["transfi", "stripe", "paypal", "square"];

/// Billing-style local parts accepted as vendor senders during
/// classification.
const BILLING_LOCAL_PARTS: &[&str] = &["billing@", "invoices@", "noreply@", "accounts@"];

/// Billing-style local parts for the sender-consistency check. Narrower
/// than the classification list: a bare accounts@ is not enough to tie a
/// sender to a vendor.
const CONSISTENCY_LOCAL_PARTS: &[&str] = &["billing@", "invoices@", "noreply@"];

/// Invoice-number strings that mean "none", not a real number.
const NUMBER_PLACEHOLDERS: &[&str] = &["None", "null", ""];

/// Prefixes of invoice numbers the extraction layer fabricates itself.
const AUTO_GENERATED_PREFIXES: &[&str] = &["AUTO-"];

/// Typical spend per vendor, as (min, max) whole-currency amounts.
const VENDOR_AMOUNT_RANGES: &[(&str, i64, i64)] = &[
    ("github", 5, 500),
    ("datadog", 50, 10_000),
    ("atlassian", 10, 2_000),
    ("jira", 10, 2_000),
    ("slack", 5, 1_000),
    ("zoom", 10, 500),
    ("aws", 1, 50_000),
    ("azure", 1, 50_000),
];

/// Rule-based validator deciding whether a candidate is a genuine,
/// savable invoice for a given user.
pub struct InvoiceValidationEngine {
    store: Arc<dyn InvoiceStore>,
    date_shaped: Regex,
    date_shaped_dashed: Regex,
}

impl InvoiceValidationEngine {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self {
            store,
            date_shaped: Regex::new(r"^\d{8}$").unwrap(),
            date_shaped_dashed: Regex::new(r"^\d{6}-\d{8}$").unwrap(),
        }
    }

    /// Run the full rule pipeline.
    ///
    /// Store lookup failures are infrastructure trouble and propagate;
    /// everything about the candidate's *content* lands in the verdict.
    pub async fn validate(
        &self,
        candidate: &CandidateInvoice,
        user_id: &str,
    ) -> Result<ValidationVerdict, StoreError> {
        // Rule 1: duplicate by (vendor, invoice number).
        if let Some(error) = self.check_duplicate_identity(candidate, user_id).await? {
            info!(user_id, error = %error, "Rejected as duplicate invoice");
            return Ok(ValidationVerdict::rejected(DocumentType::Unknown, error));
        }

        // Rule 2: duplicate by source message. A candidate without a
        // message id is rejected here too: an invoice must be traceable
        // to the email it came from. Deliberately asymmetric with rule 1.
        if let Some(error) = self.check_duplicate_message(candidate, user_id).await? {
            info!(user_id, error = %error, "Rejected by message-id check");
            return Ok(ValidationVerdict::rejected(DocumentType::Unknown, error));
        }

        // Rule 3: required fields.
        let missing = required_field_errors(candidate);
        if !missing.is_empty() {
            info!(user_id, ?missing, "Rejected for missing required fields");
            return Ok(ValidationVerdict::rejected_all(DocumentType::Unknown, missing));
        }

        // Rules 4–6: classification. Payment notifications are processor
        // chatter, not invoices; receipts and unknowns stay in play.
        let classification = classify_document(
            &candidate.email_subject,
            &candidate.email_sender,
            candidate.vendor_name.as_deref().unwrap_or(""),
        );
        if classification == DocumentType::PaymentNotification {
            let error = format!(
                "Document classified as {classification}, not a genuine invoice"
            );
            info!(user_id, "Rejected as payment notification");
            return Ok(ValidationVerdict::rejected(classification, error));
        }

        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut requires_manual_review = false;

        // Rules 10–12: business plausibility.
        check_amount_range(candidate, &mut warnings, &mut requires_manual_review);
        check_date_plausibility(candidate, &mut warnings, &mut requires_manual_review);

        // Rules 13–15: AI result quality.
        self.check_ai_quality(
            candidate,
            &mut errors,
            &mut warnings,
            &mut requires_manual_review,
        );

        let should_save = errors.is_empty();
        if should_save {
            debug!(
                user_id,
                classification = %classification,
                warnings = warnings.len(),
                requires_manual_review,
                "Candidate passed validation"
            );
        } else {
            info!(user_id, ?errors, "Rejected by AI-quality checks");
        }

        Ok(ValidationVerdict {
            is_valid: should_save,
            should_save,
            requires_manual_review,
            classification,
            errors,
            warnings,
        })
    }

    /// Rule 1. Returns the rejection message when a duplicate exists.
    /// Skipped (never failed) when the invoice number is absent — many
    /// legitimate payment confirmations carry no number.
    async fn check_duplicate_identity(
        &self,
        candidate: &CandidateInvoice,
        user_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let number = candidate
            .invoice_number
            .as_deref()
            .filter(|n| !NUMBER_PLACEHOLDERS.contains(n));
        let Some(number) = number else {
            warn!(
                vendor = candidate.vendor_name.as_deref().unwrap_or("<none>"),
                "No invoice number provided, skipping duplicate check"
            );
            return Ok(None);
        };
        let Some(vendor) = candidate.vendor_name.as_deref().filter(|v| !v.is_empty()) else {
            warn!("No vendor name provided, skipping duplicate check");
            return Ok(None);
        };

        let existing = self.store.find_by_identity(user_id, vendor, number).await?;
        Ok(existing.map(|_| {
            format!("Duplicate invoice ID '{number}' for vendor '{vendor}'")
        }))
    }

    /// Rule 2. Returns the rejection message for a reprocessed or
    /// untraceable message.
    async fn check_duplicate_message(
        &self,
        candidate: &CandidateInvoice,
        user_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(message_id) = candidate
            .email_message_id
            .as_deref()
            .filter(|m| !m.is_empty())
        else {
            return Ok(Some(
                "Missing email message ID: invoice cannot be traced to a source email".into(),
            ));
        };

        let existing = self.store.find_by_message(user_id, message_id).await?;
        Ok(existing.map(|_| format!("Email message already processed: {message_id}")))
    }

    /// Rules 13–15.
    fn check_ai_quality(
        &self,
        candidate: &CandidateInvoice,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
        requires_manual_review: &mut bool,
    ) {
        // Rule 13: confidence thresholds.
        let confidence = candidate.confidence_score;
        if confidence < CONFIDENCE_REJECT_FLOOR {
            errors.push(format!("AI confidence too low: {confidence}"));
        } else if confidence < CONFIDENCE_REVIEW_FLOOR {
            warnings.push(format!("Low AI confidence: {confidence}"));
            *requires_manual_review = true;
        }

        // Rule 14: sender-vendor consistency.
        if let Some(vendor) = candidate.vendor_name.as_deref().filter(|v| !v.is_empty()) {
            let sender_lower = candidate.email_sender.to_lowercase();
            if !sender_lower.is_empty() {
                let vendor_lower = vendor.to_lowercase();
                let billing_sender = CONSISTENCY_LOCAL_PARTS
                    .iter()
                    .any(|p| sender_lower.contains(p));
                if !sender_lower.contains(&vendor_lower) && !billing_sender {
                    warnings.push(format!(
                        "Vendor '{vendor}' doesn't match email sender '{}'",
                        candidate.email_sender
                    ));
                    *requires_manual_review = true;
                }
            }
        }

        // Rule 15: invoice number shape.
        if let Some(number) = candidate.invoice_number.as_deref().filter(|n| !n.is_empty()) {
            if AUTO_GENERATED_PREFIXES.iter().any(|p| number.starts_with(p)) {
                errors.push("Auto-generated invoice number detected".into());
            }
            if self.date_shaped.is_match(number) || self.date_shaped_dashed.is_match(number) {
                warnings.push("Suspicious invoice number format (date pattern)".into());
                *requires_manual_review = true;
            }
        }
    }
}

/// Rule 3: vendor name and a positive total are the floor for saving
/// anything. Invoice number and dates may be missing.
fn required_field_errors(candidate: &CandidateInvoice) -> Vec<String> {
    let mut errors = Vec::new();
    if candidate
        .vendor_name
        .as_deref()
        .is_none_or(|v| v.trim().is_empty())
    {
        errors.push("Missing required field: vendor_name".into());
    }
    if candidate.total_amount <= Decimal::ZERO {
        errors.push("Missing or invalid required field: total_amount".into());
    }
    errors
}

/// Rules 4–6: ordered keyword classification over subject and sender.
pub fn classify_document(
    email_subject: &str,
    email_sender: &str,
    vendor_name: &str,
) -> DocumentType {
    let subject_lower = email_subject.to_lowercase();
    let sender_lower = email_sender.to_lowercase();
    let vendor_lower = vendor_name.to_lowercase();

    // Payment notification: processor chatter about a payment attempt.
    // Requires BOTH a notification keyword and a processor sender, so a
    // vendor's own "payment received" receipt stays classifiable below.
    for keyword in PAYMENT_NOTIFICATION_KEYWORDS {
        if subject_lower.contains(keyword)
            && PAYMENT_PROCESSORS.iter().any(|p| sender_lower.contains(p))
        {
            return DocumentType::PaymentNotification;
        }
    }

    for keyword in PAYMENT_RECEIPT_KEYWORDS {
        if subject_lower.contains(keyword) {
            return DocumentType::PaymentReceipt;
        }
    }

    for keyword in INVOICE_KEYWORDS {
        if subject_lower.contains(keyword) {
            let vendor_sender = !vendor_lower.is_empty() && sender_lower.contains(&vendor_lower);
            let billing_sender = BILLING_LOCAL_PARTS.iter().any(|p| sender_lower.contains(p));
            if vendor_sender || billing_sender {
                return DocumentType::Invoice;
            }
        }
    }

    DocumentType::Unknown
}

/// Rule 10: flag totals outside the typical range for known vendors.
fn check_amount_range(
    candidate: &CandidateInvoice,
    warnings: &mut Vec<String>,
    requires_manual_review: &mut bool,
) {
    let vendor_lower = candidate
        .vendor_name
        .as_deref()
        .unwrap_or("")
        .to_lowercase();
    for (vendor, min, max) in VENDOR_AMOUNT_RANGES {
        if vendor_lower.contains(vendor) {
            let total = candidate.total_amount;
            if total < Decimal::from(*min) || total > Decimal::from(*max) {
                warnings.push(format!(
                    "Amount ${total} outside typical range ${min}-${max} for {vendor}"
                ));
                *requires_manual_review = true;
            }
            break;
        }
    }
}

/// Rules 11–12: invoice date plausibility. An unparseable date string is
/// a warning that short-circuits the rest of the rule — never a crash.
fn check_date_plausibility(
    candidate: &CandidateInvoice,
    warnings: &mut Vec<String>,
    requires_manual_review: &mut bool,
) {
    let date: NaiveDate = match &candidate.invoice_date {
        None => return,
        Some(InvoiceDate::Unparsed(raw)) => {
            debug!(raw = %raw, "Invoice date did not parse");
            warnings.push("Invalid invoice date format".into());
            *requires_manual_review = true;
            return;
        }
        Some(InvoiceDate::Parsed(d)) => *d,
    };

    let today = Utc::now().date_naive();
    if date > today {
        warnings.push("Future invoice date detected".into());
        *requires_manual_review = true;
    }
    if date < today - Duration::days(MAX_INVOICE_AGE_DAYS) {
        warnings.push("Very old invoice date (>2 years)".into());
        *requires_manual_review = true;
    }
}
