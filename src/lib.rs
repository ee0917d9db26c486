//! Invoice Scan — inbox-to-ledger invoice extraction core.
//!
//! Pipeline: email source → AI extraction (normalize → validate, retried)
//! → rule-based validation engine → verdict → idempotent persistence.

pub mod config;
pub mod error;
pub mod extraction;
pub mod persist;
pub mod pipeline;
pub mod store;
pub mod validation;
