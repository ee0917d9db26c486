//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Tunables for the extraction orchestrator.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Minimum spacing between consecutive backend calls.
    ///
    /// A hard external-resource constraint, paced per orchestrator
    /// instance. Callers issuing many emails in sequence serialize
    /// through this floor.
    pub min_call_interval: Duration,
    /// Total attempts per email (first call + retries).
    pub max_attempts: u32,
    /// Upper bound on the optimized content embedded in the prompt.
    pub max_content_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_call_interval: Duration::from_millis(500),
            max_attempts: 2,
            max_content_chars: 1500,
        }
    }
}

/// Connection settings for the OpenAI-compatible chat completions backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Full chat completions endpoint URL.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Bearer token for the backend.
    pub api_key: SecretString,
    /// Per-request timeout. The retry budget bounds total latency to
    /// roughly `max_attempts * request_timeout` plus the rate-limit floor.
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Build a config with the default 30 second timeout.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_defaults() {
        let cfg = ExtractionConfig::default();
        assert_eq!(cfg.min_call_interval, Duration::from_millis(500));
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.max_content_chars, 1500);
    }

    #[test]
    fn backend_config_default_timeout() {
        let cfg = BackendConfig::new(
            "https://api.example.com/v1/chat/completions",
            "extract-1",
            SecretString::from("test-key"),
        );
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.model, "extract-1");
    }
}
