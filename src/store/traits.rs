//! `InvoiceStore` trait — the async persistence interface the engine and
//! the persistence adapter share.
//!
//! Exactly three shapes are needed: the two duplicate lookups and a
//! uniqueness-enforcing insert. The unique constraints are sparse — rows
//! with a NULL invoice number or message id never collide.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::pipeline::types::ExtractionSource;

/// A persisted invoice. Created once per accepted candidate; this core
/// never mutates or deletes it.
#[derive(Debug, Clone)]
pub struct StoredInvoice {
    pub id: String,
    pub user_id: String,
    pub vendor_name: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub total_amount: Decimal,
    pub currency: String,
    pub category: Option<String>,
    pub confidence_score: f32,
    pub classification: String,
    pub requires_manual_review: bool,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_message_id: Option<String>,
    pub source: ExtractionSource,
    pub created_at: DateTime<Utc>,
}

/// Fields of a new invoice row.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: String,
    pub user_id: String,
    pub vendor_name: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub total_amount: Decimal,
    pub currency: String,
    pub category: Option<String>,
    pub confidence_score: f32,
    pub classification: String,
    pub requires_manual_review: bool,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_message_id: Option<String>,
    pub source: ExtractionSource,
}

/// Result of an insert attempt.
///
/// A duplicate is a first-class outcome, not an error: it is how a lost
/// race between concurrent scans for the same user resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written; carries the new row id.
    Inserted(String),
    /// The `(user_id, vendor_name, invoice_number)` constraint fired.
    DuplicateIdentity,
    /// The `(user_id, email_message_id)` constraint fired.
    DuplicateMessage,
}

/// Backend-agnostic invoice persistence.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Find one invoice matching `(user_id, vendor_name, invoice_number)`.
    async fn find_by_identity(
        &self,
        user_id: &str,
        vendor_name: &str,
        invoice_number: &str,
    ) -> Result<Option<StoredInvoice>, StoreError>;

    /// Find one invoice matching `(user_id, email_message_id)`.
    async fn find_by_message(
        &self,
        user_id: &str,
        email_message_id: &str,
    ) -> Result<Option<StoredInvoice>, StoreError>;

    /// Insert a new invoice, enforcing uniqueness on both identity
    /// tuples at the storage layer.
    async fn insert(&self, invoice: &NewInvoice) -> Result<InsertOutcome, StoreError>;
}
