//! Persistence adapter — the only writer of invoice rows.
//!
//! Trusts the engine's verdict for the save decision and the store's
//! unique constraints for correctness: when the engine's duplicate check
//! raced a concurrent scan and lost, the constraint fires here and the
//! insert resolves to a non-fatal `Duplicate` outcome.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::pipeline::types::CandidateInvoice;
use crate::store::traits::{InsertOutcome, InvoiceStore, NewInvoice};
use crate::validation::types::ValidationVerdict;

/// Result of persisting a validated candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The invoice was written.
    Saved { invoice_id: String },
    /// A concurrent scan already wrote this identity; nothing inserted.
    Duplicate,
}

/// Writes validated candidates to the store, idempotently.
pub struct InvoicePersistenceAdapter {
    store: Arc<dyn InvoiceStore>,
}

impl InvoicePersistenceAdapter {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Persist a candidate the engine approved.
    ///
    /// Calling this with a verdict that does not permit saving is a
    /// caller bug and returns `PersistenceError::NotSavable`; store
    /// unavailability propagates as the hard failure it is.
    pub async fn persist(
        &self,
        candidate: &CandidateInvoice,
        verdict: &ValidationVerdict,
        user_id: &str,
    ) -> Result<PersistOutcome, PersistenceError> {
        if !verdict.should_save {
            return Err(PersistenceError::NotSavable(
                "verdict does not permit saving".into(),
            ));
        }
        let Some(vendor_name) = candidate
            .vendor_name
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        else {
            return Err(PersistenceError::NotSavable(
                "candidate has no vendor name".into(),
            ));
        };

        let invoice = NewInvoice {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            vendor_name: vendor_name.to_string(),
            invoice_number: candidate.invoice_number.clone(),
            invoice_date: candidate.invoice_date.as_ref().and_then(|d| d.as_date()),
            due_date: candidate.due_date.as_ref().and_then(|d| d.as_date()),
            amount: candidate.amount,
            tax_amount: candidate.tax_amount,
            total_amount: candidate.total_amount,
            currency: candidate.currency.clone(),
            category: candidate.category.clone(),
            confidence_score: candidate.confidence_score,
            classification: verdict.classification.as_str().to_string(),
            requires_manual_review: verdict.requires_manual_review,
            email_subject: Some(candidate.email_subject.clone()),
            email_sender: Some(candidate.email_sender.clone()),
            email_message_id: candidate.email_message_id.clone(),
            source: candidate.source,
        };

        match self.store.insert(&invoice).await? {
            InsertOutcome::Inserted(invoice_id) => {
                info!(
                    invoice_id = %invoice_id,
                    vendor = %invoice.vendor_name,
                    total = %invoice.total_amount,
                    "Invoice saved"
                );
                Ok(PersistOutcome::Saved { invoice_id })
            }
            InsertOutcome::DuplicateIdentity | InsertOutcome::DuplicateMessage => {
                // The engine's check is advisory; losing the race here is
                // an expected outcome, not a system error.
                warn!(
                    vendor = %invoice.vendor_name,
                    "Insert lost a duplicate race; treating as already saved"
                );
                Ok(PersistOutcome::Duplicate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::pipeline::types::{ExtractionSource, InvoiceDate};
    use crate::store::libsql_backend::LibSqlBackend;
    use crate::validation::types::DocumentType;

    fn make_candidate(message_id: &str) -> CandidateInvoice {
        CandidateInvoice {
            vendor_name: Some("Datadog".into()),
            invoice_number: Some("DD-123".into()),
            invoice_date: Some(InvoiceDate::Parsed(
                chrono::NaiveDate::from_ymd_opt(2026, 6, 15).unwrap(),
            )),
            due_date: None,
            amount: dec!(200),
            tax_amount: None,
            total_amount: dec!(200),
            currency: "USD".into(),
            category: None,
            confidence_score: 0.9,
            email_subject: "Your Datadog invoice".into(),
            email_sender: "billing@datadoghq.com".into(),
            email_message_id: Some(message_id.into()),
            source: ExtractionSource::EmailBody,
        }
    }

    fn savable_verdict() -> ValidationVerdict {
        ValidationVerdict {
            is_valid: true,
            should_save: true,
            requires_manual_review: false,
            classification: DocumentType::Invoice,
            errors: vec![],
            warnings: vec![],
        }
    }

    #[tokio::test]
    async fn persists_approved_candidate() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let adapter = InvoicePersistenceAdapter::new(Arc::clone(&store) as Arc<dyn InvoiceStore>);

        let outcome = adapter
            .persist(&make_candidate("m1"), &savable_verdict(), "u1")
            .await
            .unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));

        let found = store
            .find_by_identity("u1", "Datadog", "DD-123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.classification, "invoice");
        assert_eq!(found.email_message_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn losing_race_resolves_to_duplicate() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let adapter = InvoicePersistenceAdapter::new(Arc::clone(&store) as Arc<dyn InvoiceStore>);

        adapter
            .persist(&make_candidate("m1"), &savable_verdict(), "u1")
            .await
            .unwrap();
        // Same identity tuple, different message: rule-1 constraint fires.
        let outcome = adapter
            .persist(&make_candidate("m2"), &savable_verdict(), "u1")
            .await
            .unwrap();
        assert_eq!(outcome, PersistOutcome::Duplicate);
    }

    #[tokio::test]
    async fn refuses_unsavable_verdict() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let adapter = InvoicePersistenceAdapter::new(store as Arc<dyn InvoiceStore>);

        let verdict = ValidationVerdict {
            is_valid: false,
            should_save: false,
            ..savable_verdict()
        };
        let result = adapter.persist(&make_candidate("m1"), &verdict, "u1").await;
        assert!(matches!(result, Err(PersistenceError::NotSavable(_))));
    }

    #[tokio::test]
    async fn refuses_vendorless_candidate() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let adapter = InvoicePersistenceAdapter::new(store as Arc<dyn InvoiceStore>);

        let candidate = CandidateInvoice {
            vendor_name: None,
            ..make_candidate("m1")
        };
        let result = adapter.persist(&candidate, &savable_verdict(), "u1").await;
        assert!(matches!(result, Err(PersistenceError::NotSavable(_))));
    }
}
