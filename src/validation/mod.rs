//! Rule-based invoice validation.

pub mod engine;
pub mod types;

pub use engine::InvoiceValidationEngine;
pub use types::{DocumentType, ValidationVerdict};
