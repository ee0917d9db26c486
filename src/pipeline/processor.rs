//! Invoice processor — runs one email through the full pipeline.
//!
//! Flow:
//! 1. Choose extraction text: PDF attachment text when available,
//!    otherwise the email body
//! 2. `ExtractionOrchestrator::extract` → candidate or determination
//! 3. `InvoiceValidationEngine::validate` → verdict
//! 4. `InvoicePersistenceAdapter::persist` when the verdict says save
//!
//! Within one email every stage is strictly sequential; across emails
//! the caller may run processors concurrently — the store's unique
//! constraints serialize the outcome.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::extraction::orchestrator::{ExtractionOrchestrator, ExtractionOutcome};
use crate::extraction::pdf::extract_pdf_text;
use crate::extraction::validator::parse_date;
use crate::persist::{InvoicePersistenceAdapter, PersistOutcome};
use crate::pipeline::types::{
    CandidateInvoice, ExtractionSource, InvoiceDate, ScanOutcome, ScanReport, SourceEmail,
};
use crate::validation::engine::InvoiceValidationEngine;

/// Drives emails through extraction → validation → persistence.
pub struct InvoiceProcessor {
    orchestrator: ExtractionOrchestrator,
    engine: Arc<InvoiceValidationEngine>,
    adapter: Arc<InvoicePersistenceAdapter>,
}

impl InvoiceProcessor {
    pub fn new(
        orchestrator: ExtractionOrchestrator,
        engine: Arc<InvoiceValidationEngine>,
        adapter: Arc<InvoicePersistenceAdapter>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            adapter,
        }
    }

    /// Scan a single email for the given user.
    ///
    /// Content-driven rejections come back as `ScanOutcome`s; only
    /// infrastructure failures (store, persistence) surface as errors so
    /// the batch caller can record them.
    pub async fn scan_email(
        &self,
        user_id: &str,
        email: &SourceEmail,
    ) -> Result<ScanOutcome, PipelineError> {
        info!(
            user_id,
            message_id = %email.message_id,
            sender = %email.sender,
            "Scanning email"
        );

        let (text, source) = choose_extraction_text(email);

        let extracted = match self.orchestrator.extract(&email.subject, &text).await {
            ExtractionOutcome::Candidate(extracted) => extracted,
            ExtractionOutcome::NotAnInvoice => {
                debug!(message_id = %email.message_id, "Not an invoice");
                return Ok(ScanOutcome::NotAnInvoice);
            }
            ExtractionOutcome::Failed { reason } => {
                warn!(message_id = %email.message_id, reason = %reason, "Extraction failed");
                return Ok(ScanOutcome::ExtractionFailed { reason });
            }
        };

        let mut candidate = CandidateInvoice::from_extracted(extracted, email, source);
        if candidate.invoice_date.is_none()
            && let Some(date) = email_date(email)
        {
            // Receipts often carry no explicit date; the email's own
            // date is the best stand-in.
            candidate.invoice_date = Some(date);
        }

        let verdict = self.engine.validate(&candidate, user_id).await?;
        if !verdict.should_save {
            info!(
                message_id = %email.message_id,
                errors = ?verdict.errors,
                "Candidate rejected"
            );
            return Ok(ScanOutcome::Rejected { verdict });
        }

        match self.adapter.persist(&candidate, &verdict, user_id).await? {
            PersistOutcome::Saved { invoice_id } => Ok(ScanOutcome::Saved {
                invoice_id,
                verdict,
            }),
            PersistOutcome::Duplicate => Ok(ScanOutcome::Duplicate { verdict }),
        }
    }

    /// Scan a batch of emails independently.
    ///
    /// Per-email infrastructure failures are captured in the report; a
    /// single bad email never aborts the rest of the batch.
    pub async fn scan_batch(&self, user_id: &str, emails: &[SourceEmail]) -> Vec<ScanReport> {
        let count = emails.len();
        info!(user_id, count, "Scanning email batch");

        let mut reports = Vec::with_capacity(count);
        for email in emails {
            let outcome = self.scan_email(user_id, email).await;
            if let Err(e) = &outcome {
                error!(
                    message_id = %email.message_id,
                    error = %e,
                    "Email scan failed; continuing batch"
                );
            }
            reports.push(ScanReport {
                message_id: email.message_id.clone(),
                outcome,
            });
        }

        let saved = reports
            .iter()
            .filter(|r| matches!(r.outcome, Ok(ScanOutcome::Saved { .. })))
            .count();
        info!(user_id, total = count, saved, "Batch scan complete");
        reports
    }
}

/// Prefer PDF attachment text over the email body — bodies of attachment
/// invoices are usually just "see attached".
fn choose_extraction_text(email: &SourceEmail) -> (String, ExtractionSource) {
    for attachment in &email.attachments {
        if !attachment.is_pdf() {
            continue;
        }
        let Some(bytes) = attachment.content.as_deref() else {
            debug!(filename = %attachment.filename, "PDF attachment has no fetched content");
            continue;
        };
        if let Some(text) = extract_pdf_text(bytes) {
            info!(filename = %attachment.filename, "Using PDF attachment text");
            return (text, ExtractionSource::Pdf);
        }
    }
    (email.body.clone(), ExtractionSource::EmailBody)
}

/// Parse the source email's own date (RFC 2822 or ISO 8601).
fn email_date(email: &SourceEmail) -> Option<InvoiceDate> {
    let raw = email.date.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(raw) {
        return Some(InvoiceDate::Parsed(dt.date_naive()));
    }
    match parse_date(raw) {
        d @ InvoiceDate::Parsed(_) => Some(d),
        // An unparseable *email* date is not worth a review flag.
        InvoiceDate::Unparsed(_) => None,
    }
}
