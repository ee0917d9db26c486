//! Shared types for the invoice scanning pipeline.
//!
//! Email sources convert their native format into `SourceEmail`. The
//! pipeline processes it through extraction → validation → persistence
//! and reports a `ScanOutcome` per email.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::extraction::validator::ExtractedInvoice;
use crate::validation::types::ValidationVerdict;

// ── Inbound email ───────────────────────────────────────────────────

/// A candidate message from an email source.
///
/// HTML is already stripped; `body` is plain text. The core never
/// re-fetches or paginates the source — that is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEmail {
    /// Channel-native message id (IMAP/Gmail message id).
    pub message_id: String,
    /// Subject line.
    pub subject: String,
    /// Sender, either RFC 5322 "Name <addr>" or a bare address.
    pub sender: String,
    /// Plain-text body.
    pub body: String,
    /// Message date as supplied by the source (RFC 2822 or ISO 8601).
    pub date: Option<String>,
    /// Attachment list with pre-fetched content where available.
    #[serde(default)]
    pub attachments: Vec<EmailAttachment>,
}

/// An email attachment. Content is pre-fetched by the source adapter;
/// the pipeline performs no I/O against the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
    /// Raw bytes, if the source chose to fetch them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
}

impl EmailAttachment {
    /// Whether this attachment looks like a PDF invoice document.
    pub fn is_pdf(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("application/pdf")
            || self.filename.to_lowercase().ends_with(".pdf")
    }
}

/// Trait for email sources — pure I/O, no business logic.
///
/// Extraction, validation, and persistence live in `InvoiceProcessor`.
#[async_trait]
pub trait EmailSource: Send + Sync {
    /// Source name (e.g. "gmail", "imap").
    fn name(&self) -> &str;

    /// Fetch new candidate messages from this source.
    async fn fetch_new(&self) -> Result<Vec<SourceEmail>, PipelineError>;
}

// ── Invoice dates ───────────────────────────────────────────────────

/// A date as extracted from AI output.
///
/// The backend is supposed to emit ISO dates but frequently does not;
/// rather than dropping unparseable strings, they are carried through so
/// the validation engine can flag them for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvoiceDate {
    Parsed(NaiveDate),
    Unparsed(String),
}

impl InvoiceDate {
    /// The parsed date, if this value parsed.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Parsed(d) => Some(*d),
            Self::Unparsed(_) => None,
        }
    }
}

// ── Extraction provenance ───────────────────────────────────────────

/// Where the extracted text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Text extracted from a PDF attachment.
    Pdf,
    /// The email body itself.
    EmailBody,
    /// Content downloaded from an invoice link by the caller.
    LinkFallback,
}

impl ExtractionSource {
    /// Stable string form for storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::EmailBody => "email_body",
            Self::LinkFallback => "link_fallback",
        }
    }

    /// Parse the stable string form. Unknown values fall back to
    /// `EmailBody`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "pdf" => Self::Pdf,
            "link_fallback" => Self::LinkFallback,
            _ => Self::EmailBody,
        }
    }
}

// ── Candidate invoice ───────────────────────────────────────────────

/// An unvalidated invoice record produced by AI extraction from one
/// email. Constructed once and passed by value; validation never
/// mutates it. Email metadata is carried through from the source
/// message unaltered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInvoice {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<InvoiceDate>,
    pub due_date: Option<InvoiceDate>,
    pub amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub total_amount: Decimal,
    pub currency: String,
    pub category: Option<String>,
    /// Backend's own confidence in the extraction, clamped to [0, 1].
    pub confidence_score: f32,
    pub email_subject: String,
    pub email_sender: String,
    pub email_message_id: Option<String>,
    pub source: ExtractionSource,
}

impl CandidateInvoice {
    /// Combine extracted fields with the metadata of the email they came
    /// from.
    pub fn from_extracted(
        extracted: ExtractedInvoice,
        email: &SourceEmail,
        source: ExtractionSource,
    ) -> Self {
        Self {
            vendor_name: Some(extracted.vendor_name),
            invoice_number: extracted.invoice_number,
            invoice_date: extracted.invoice_date,
            due_date: extracted.due_date,
            amount: extracted.amount,
            tax_amount: extracted.tax_amount,
            total_amount: extracted.total_amount,
            currency: extracted.currency,
            category: extracted.category,
            confidence_score: extracted.confidence_score,
            email_subject: email.subject.clone(),
            email_sender: email.sender.clone(),
            email_message_id: Some(email.message_id.clone()),
            source,
        }
    }
}

// ── Scan results ────────────────────────────────────────────────────

/// Outcome of scanning a single email.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// A validated invoice was persisted.
    Saved {
        invoice_id: String,
        verdict: ValidationVerdict,
    },
    /// Validation passed but the insert lost a race against a concurrent
    /// scan; the record already exists.
    Duplicate { verdict: ValidationVerdict },
    /// A candidate was extracted but rejected by the validation engine.
    Rejected { verdict: ValidationVerdict },
    /// The backend authoritatively determined this email is not an
    /// invoice. Not an error.
    NotAnInvoice,
    /// Extraction gave up (retries exhausted, content filter, transport
    /// failure). Distinguished from `NotAnInvoice` in logs.
    ExtractionFailed { reason: String },
}

impl ScanOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Saved { .. } => "saved",
            Self::Duplicate { .. } => "duplicate",
            Self::Rejected { .. } => "rejected",
            Self::NotAnInvoice => "not_an_invoice",
            Self::ExtractionFailed { .. } => "extraction_failed",
        }
    }
}

/// Per-email result of a batch scan. Infrastructure failures are carried
/// here so one bad email never aborts the batch.
#[derive(Debug)]
pub struct ScanReport {
    pub message_id: String,
    pub outcome: std::result::Result<ScanOutcome, PipelineError>,
}
