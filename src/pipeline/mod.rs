//! Invoice scanning pipeline — email in, scan outcome out.

pub mod processor;
pub mod types;

pub use processor::InvoiceProcessor;
pub use types::{
    CandidateInvoice, EmailAttachment, EmailSource, ExtractionSource, InvoiceDate, ScanOutcome,
    ScanReport, SourceEmail,
};
