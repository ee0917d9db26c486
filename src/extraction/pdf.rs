//! PDF attachment text extraction.
//!
//! Invoices arriving as PDF attachments are preferred over the email
//! body: the body is often just "your invoice is attached". Scanned
//! (image-only) PDFs yield no text and fall back to the body.

use tracing::{debug, warn};

/// Minimum non-whitespace characters for the text to count as a real
/// extraction rather than a scanned page.
const MIN_TEXT_CHARS: usize = 30;

/// Extract text from PDF bytes.
///
/// Returns `None` for parse failures and for PDFs without meaningful
/// text — both mean "use the email body instead", never an error.
pub fn extract_pdf_text(pdf_bytes: &[u8]) -> Option<String> {
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                debug!(chars = meaningful, "PDF text too short, likely scanned");
                None
            } else {
                debug!(chars = meaningful, "Extracted text from PDF attachment");
                Some(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "PDF text extraction failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_yield_none() {
        assert!(extract_pdf_text(b"definitely not a pdf").is_none());
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(extract_pdf_text(&[]).is_none());
    }
}
