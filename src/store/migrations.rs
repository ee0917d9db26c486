//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()`
//! checks the current version and applies only the new ones
//! sequentially.

use libsql::Connection;
use tracing::info;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
///
/// The two partial unique indexes are the pipeline's actual duplicate
/// guarantee under concurrent scans; the engine's lookups are only the
/// fast path. Partial indexes keep the constraints sparse: rows without
/// an invoice number or message id never collide.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            vendor_name TEXT NOT NULL,
            invoice_number TEXT,
            invoice_date TEXT,
            due_date TEXT,
            amount TEXT NOT NULL,
            tax_amount TEXT,
            total_amount TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            category TEXT,
            confidence_score REAL NOT NULL,
            classification TEXT NOT NULL,
            requires_manual_review INTEGER NOT NULL DEFAULT 0,
            email_subject TEXT,
            email_sender TEXT,
            email_message_id TEXT,
            source TEXT NOT NULL DEFAULT 'email_body',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_invoices_user ON invoices(user_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_identity
            ON invoices(user_id, vendor_name, invoice_number)
            WHERE invoice_number IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_message
            ON invoices(user_id, email_message_id)
            WHERE email_message_id IS NOT NULL;
    "#,
}];

/// Apply all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("failed to create _migrations table: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                StoreError::Migration(format!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| {
            StoreError::Migration(format!(
                "failed to record migration {}: {e}",
                migration.version
            ))
        })?;
        info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("failed to read migration version: {e}")))?;
    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("failed to read migration version: {e}")))?;
    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| StoreError::Migration(format!("bad migration version: {e}"))),
        None => Ok(0),
    }
}
