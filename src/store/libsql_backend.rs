//! libSQL backend — async `InvoiceStore` implementation.
//!
//! Supports local file and in-memory databases. The in-memory variant
//! backs the test suites.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::pipeline::types::ExtractionSource;
use crate::store::migrations;
use crate::store::traits::{InsertOutcome, InvoiceStore, NewInvoice, StoredInvoice};

/// Column list shared by the two lookups. Order matches `row_to_invoice`.
const INVOICE_COLUMNS: &str = "id, user_id, vendor_name, invoice_number, invoice_date, \
     due_date, amount, tax_amount, total_amount, currency, category, confidence_score, \
     classification, requires_manual_review, email_subject, email_sender, \
     email_message_id, source, created_at";

/// libSQL invoice store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Invoice database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

fn parse_decimal(s: &str, column: &str) -> Result<Decimal, StoreError> {
    s.parse::<Decimal>()
        .map_err(|e| StoreError::Serialization(format!("bad {column} value {s:?}: {e}")))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_date_opt(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn row_to_invoice(row: &libsql::Row) -> Result<StoredInvoice, StoreError> {
    let get_str = |i: i32| -> Result<String, StoreError> {
        row.get::<String>(i)
            .map_err(|e| StoreError::Serialization(format!("column {i}: {e}")))
    };
    let get_opt = |i: i32| -> Option<String> { row.get::<String>(i).ok() };

    let amount = parse_decimal(&get_str(6)?, "amount")?;
    let tax_amount = get_opt(7)
        .map(|s| parse_decimal(&s, "tax_amount"))
        .transpose()?;
    let total_amount = parse_decimal(&get_str(8)?, "total_amount")?;

    Ok(StoredInvoice {
        id: get_str(0)?,
        user_id: get_str(1)?,
        vendor_name: get_str(2)?,
        invoice_number: get_opt(3),
        invoice_date: parse_date_opt(get_opt(4)),
        due_date: parse_date_opt(get_opt(5)),
        amount,
        tax_amount,
        total_amount,
        currency: get_str(9)?,
        category: get_opt(10),
        confidence_score: row.get::<f64>(11).unwrap_or(0.0) as f32,
        classification: get_str(12)?,
        requires_manual_review: row.get::<i64>(13).unwrap_or(0) != 0,
        email_subject: get_opt(14),
        email_sender: get_opt(15),
        email_message_id: get_opt(16),
        source: ExtractionSource::from_str_lossy(&get_str(17)?),
        created_at: parse_datetime(&get_str(18)?),
    })
}

/// Convert `Option<&str>` to a libsql Value (NULL when absent).
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Classify a UNIQUE-constraint failure by the index it names.
fn classify_constraint(message: &str) -> Option<InsertOutcome> {
    if !message.contains("UNIQUE constraint failed") {
        return None;
    }
    if message.contains("email_message_id") {
        Some(InsertOutcome::DuplicateMessage)
    } else {
        Some(InsertOutcome::DuplicateIdentity)
    }
}

#[async_trait]
impl InvoiceStore for LibSqlBackend {
    async fn find_by_identity(
        &self,
        user_id: &str,
        vendor_name: &str,
        invoice_number: &str,
    ) -> Result<Option<StoredInvoice>, StoreError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE user_id = ?1 AND vendor_name = ?2 AND invoice_number = ?3 LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![user_id, vendor_name, invoice_number])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_invoice(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_message(
        &self,
        user_id: &str,
        email_message_id: &str,
    ) -> Result<Option<StoredInvoice>, StoreError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE user_id = ?1 AND email_message_id = ?2 LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![user_id, email_message_id])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_invoice(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, invoice: &NewInvoice) -> Result<InsertOutcome, StoreError> {
        let result = self
            .conn
            .execute(
                "INSERT INTO invoices (
                    id, user_id, vendor_name, invoice_number, invoice_date, due_date,
                    amount, tax_amount, total_amount, currency, category,
                    confidence_score, classification, requires_manual_review,
                    email_subject, email_sender, email_message_id, source, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    invoice.id.as_str(),
                    invoice.user_id.as_str(),
                    invoice.vendor_name.as_str(),
                    opt_text(invoice.invoice_number.as_deref()),
                    opt_text(
                        invoice
                            .invoice_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .as_deref()
                    ),
                    opt_text(
                        invoice
                            .due_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .as_deref()
                    ),
                    invoice.amount.to_string(),
                    opt_text(invoice.tax_amount.map(|t| t.to_string()).as_deref()),
                    invoice.total_amount.to_string(),
                    invoice.currency.as_str(),
                    opt_text(invoice.category.as_deref()),
                    invoice.confidence_score as f64,
                    invoice.classification.as_str(),
                    invoice.requires_manual_review as i64,
                    opt_text(invoice.email_subject.as_deref()),
                    opt_text(invoice.email_sender.as_deref()),
                    opt_text(invoice.email_message_id.as_deref()),
                    invoice.source.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(id = %invoice.id, vendor = %invoice.vendor_name, "Invoice inserted");
                Ok(InsertOutcome::Inserted(invoice.id.clone()))
            }
            Err(e) => {
                let message = e.to_string();
                match classify_constraint(&message) {
                    Some(outcome) => {
                        debug!(id = %invoice.id, %message, "Insert hit unique constraint");
                        Ok(outcome)
                    }
                    None => Err(StoreError::Query(message)),
                }
            }
        }
    }
}
