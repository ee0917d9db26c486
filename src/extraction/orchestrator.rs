//! Extraction orchestrator — drives the AI backend for one email.
//!
//! Flow per attempt: pace against the rate-limit floor → backend call →
//! normalize → validate. Accept and confirmed-non-invoice results return
//! immediately; everything else retries until the attempt budget (2) is
//! spent. Backend exceptions never propagate past this component.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::extraction::backend::{ExtractionBackend, FinishReason};
use crate::extraction::content::optimize_content;
use crate::extraction::normalizer::normalize;
use crate::extraction::validator::{ExtractedInvoice, ResponseOutcome, validate_response};

/// Result of driving the backend for one email.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// A structurally valid candidate was extracted.
    Candidate(ExtractedInvoice),
    /// The backend authoritatively said this is not an invoice.
    NotAnInvoice,
    /// Retries exhausted or a non-retryable signal was received.
    Failed { reason: String },
}

/// Paces calls so consecutive requests respect the backend's rate limit.
///
/// Instance state, deliberately not shared across orchestrators: each
/// worker paces its own calls, and independent pipelines (e.g. in tests)
/// must not interfere with each other.
struct RateLimiter {
    min_interval: std::time::Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: std::time::Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Sleep out the remainder of the interval, then stamp this call.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiting backend call");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Orchestrates extraction attempts against the AI backend.
pub struct ExtractionOrchestrator {
    backend: Arc<dyn ExtractionBackend>,
    config: ExtractionConfig,
    limiter: RateLimiter,
}

impl ExtractionOrchestrator {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: ExtractionConfig) -> Self {
        let limiter = RateLimiter::new(config.min_call_interval);
        Self {
            backend,
            config,
            limiter,
        }
    }

    /// Extract a candidate invoice from email text.
    ///
    /// `body_text` is the chosen extraction text: the plain email body,
    /// or text pulled out of a PDF attachment.
    pub async fn extract(&self, subject: &str, body_text: &str) -> ExtractionOutcome {
        let optimized = optimize_content(body_text, self.config.max_content_chars);
        let prompt = build_extraction_prompt(subject, &optimized);

        let mut last_failure = String::from("no attempts made");

        for attempt in 1..=self.config.max_attempts {
            debug!(attempt, max = self.config.max_attempts, "Extraction attempt");
            self.limiter.pace().await;

            let response = match self.backend.complete(&prompt).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "Backend call failed");
                    last_failure = e.to_string();
                    continue;
                }
            };

            match response.finish_reason {
                FinishReason::ContentFilter => {
                    // Retrying a safety block just burns quota.
                    warn!("Backend blocked the content; not retrying");
                    return ExtractionOutcome::Failed {
                        reason: "backend content-safety block".into(),
                    };
                }
                FinishReason::Length => {
                    // Truncated, but a parseable prefix may survive.
                    warn!(attempt, "Backend response truncated; parsing partial content");
                }
                _ => {}
            }

            let mapping = match normalize(&response.content) {
                Ok(m) => m,
                Err(e) => {
                    warn!(attempt, excerpt = %e.raw_excerpt, "No JSON recovered from response");
                    last_failure = e.to_string();
                    continue;
                }
            };

            match validate_response(&mapping) {
                ResponseOutcome::Accept(extracted) => {
                    info!(
                        vendor = %extracted.vendor_name,
                        total = %extracted.total_amount,
                        "Extraction accepted"
                    );
                    return ExtractionOutcome::Candidate(extracted);
                }
                ResponseOutcome::ConfirmedNonInvoice => {
                    info!("Backend confirmed non-invoice; no retry");
                    return ExtractionOutcome::NotAnInvoice;
                }
                ResponseOutcome::Incomplete { reason } => {
                    warn!(attempt, reason = %reason, "Incomplete extraction");
                    last_failure = reason;
                }
            }
        }

        ExtractionOutcome::Failed {
            reason: format!(
                "no valid extraction after {} attempts: {last_failure}",
                self.config.max_attempts
            ),
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the extraction prompt for one email.
///
/// The field set is fixed; the backend must answer with a raw JSON
/// object, `null` for unknown optional fields, and the null/null pair
/// when the content is not an invoice at all.
fn build_extraction_prompt(subject: &str, content: &str) -> String {
    format!(
        "Analyze this email and extract invoice or payment information. It may be a formal \
         invoice, a payment receipt or confirmation, a billing notification, a subscription \
         or seat-upgrade charge, or a billing summary.\n\n\
         Return ONLY a raw JSON object with exactly these fields:\n\
         {{\"vendor_name\": \"Company Name\", \"invoice_number\": \"reference or null\", \
         \"invoice_date\": \"YYYY-MM-DD or null\", \"due_date\": \"YYYY-MM-DD or null\", \
         \"amount\": 100.50, \"currency\": \"USD\", \"tax_amount\": 5.25, \
         \"total_amount\": 105.75, \"category\": \"software\", \"confidence_score\": 0.9}}\n\n\
         Rules:\n\
         - No markdown, no code fences, no explanations; start with {{ and end with }}\n\
         - Use null for any optional field you cannot determine; never invent values\n\
         - vendor_name is the actual company (e.g. \"Figma\", \"GitHub\", \"Datadog\")\n\
         - If only one amount is present, use it for both amount and total_amount\n\
         - Dates in YYYY-MM-DD; currency as a code, defaulting to USD\n\
         - confidence_score between 0 and 1, reflecting data completeness\n\
         - Payment confirmations, receipts, renewals and seat upgrades from legitimate \
           vendors all count as invoices; extract them\n\
         - If the content has NO vendor and NO amount, it is not an invoice: \
           return vendor_name=null and total_amount=null\n\n\
         Subject: {subject}\n\n\
         Content:\n{content}\n\n\
         JSON Response:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::BackendError;
    use crate::extraction::backend::BackendResponse;

    /// Mock backend that replays a fixed script of responses.
    struct ScriptedBackend {
        script: Mutex<Vec<Result<BackendResponse, BackendError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<BackendResponse, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<BackendResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().await;
            if script.is_empty() {
                return Err(BackendError::RequestFailed {
                    reason: "script exhausted".into(),
                });
            }
            script.remove(0)
        }
    }

    fn ok(content: &str) -> Result<BackendResponse, BackendError> {
        Ok(BackendResponse {
            content: content.into(),
            finish_reason: FinishReason::Stop,
        })
    }

    fn truncated(content: &str) -> Result<BackendResponse, BackendError> {
        Ok(BackendResponse {
            content: content.into(),
            finish_reason: FinishReason::Length,
        })
    }

    fn orchestrator(backend: Arc<ScriptedBackend>) -> ExtractionOrchestrator {
        // No pacing delay in unit tests.
        let config = ExtractionConfig {
            min_call_interval: Duration::ZERO,
            ..ExtractionConfig::default()
        };
        ExtractionOrchestrator::new(backend, config)
    }

    #[tokio::test]
    async fn accept_on_first_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![ok(
            r#"{"vendor_name": "GitHub", "total_amount": 4.0, "confidence_score": 0.9}"#,
        )]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Your receipt", "GitHub charged you $4.00").await;
        assert!(matches!(outcome, ExtractionOutcome::Candidate(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn non_invoice_does_not_retry() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ok("Here is the result:\n```json\n{\"vendor_name\": null, \"total_amount\": null}\n```"),
            ok(r#"{"vendor_name": "ShouldNotBeSeen", "total_amount": 1}"#),
        ]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Team seat request", "Please add a seat").await;
        assert!(matches!(outcome, ExtractionOutcome::NotAnInvoice));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn truncated_then_complete_retries_once() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            truncated(r#"{"vendor_name": "GitHub", "total_a"#),
            ok(r#"{"vendor_name": "GitHub", "total_amount": 4.0}"#),
        ]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Receipt", "GitHub $4").await;
        let ExtractionOutcome::Candidate(inv) = outcome else {
            panic!("expected candidate after retry");
        };
        assert_eq!(inv.vendor_name, "GitHub");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn truncated_but_parseable_succeeds_first_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![truncated(
            r#"{"vendor_name": "GitHub", "total_amount": 4.0}"#,
        )]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Receipt", "GitHub $4").await;
        assert!(matches!(outcome, ExtractionOutcome::Candidate(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn content_filter_fails_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(BackendResponse {
            content: String::new(),
            finish_reason: FinishReason::ContentFilter,
        })]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Weird email", "blocked content").await;
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn backend_errors_are_contained() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::RequestFailed {
                reason: "connection reset".into(),
            }),
            Err(BackendError::RequestFailed {
                reason: "connection reset".into(),
            }),
        ]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Subject", "body").await;
        let ExtractionOutcome::Failed { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("connection reset"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn incomplete_retries_then_fails() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ok(r#"{"vendor_name": "GitHub", "total_amount": null}"#),
            ok(r#"{"vendor_name": "GitHub", "total_amount": null}"#),
        ]));
        let orch = orchestrator(Arc::clone(&backend));

        let outcome = orch.extract("Receipt", "GitHub").await;
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_enforces_floor() {
        let limiter = RateLimiter::new(Duration::from_millis(500));

        let t0 = Instant::now();
        limiter.pace().await;
        limiter.pace().await;
        limiter.pace().await;
        // Two enforced gaps of 500ms under the paused clock.
        assert!(t0.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn prompt_embeds_subject_and_content() {
        let prompt = build_extraction_prompt("Your invoice", "Total: $10");
        assert!(prompt.contains("Subject: Your invoice"));
        assert!(prompt.contains("Total: $10"));
        assert!(prompt.contains("vendor_name=null and total_amount=null"));
        assert!(prompt.contains("confidence_score"));
    }
}
