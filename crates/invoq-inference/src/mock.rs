//! Mock structuring backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invoq_inference::mock::MockStructuringBackend;
//!
//! let backend = MockStructuringBackend::new()
//!     .with_fixed_response(r#"{"invoice_number": "1001", "total_amount": 250.0}"#);
//! let raw = backend.generate_structured("Invoice #1001", "schema").await?;
//! assert_eq!(backend.call_count(), 1);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use invoq_core::{Error, Result, StructuringBackend};

#[derive(Debug, Clone)]
enum MockBehavior {
    Respond(String),
    Fail(String),
}

/// A recorded `generate_structured` call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub text: String,
    pub schema_prompt: String,
}

/// [`StructuringBackend`] that returns canned output and records calls.
#[derive(Clone)]
pub struct MockStructuringBackend {
    behavior: MockBehavior,
    latency: Duration,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockStructuringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStructuringBackend {
    /// Mock that answers with an empty JSON object.
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::Respond("{}".to_string()),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every call with `response`.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        self.behavior = MockBehavior::Respond(response.into());
        self
    }

    /// Fail every call with an inference error.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.behavior = MockBehavior::Fail(message.into());
        self
    }

    /// Simulated latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl StructuringBackend for MockStructuringBackend {
    async fn generate_structured(&self, text: &str, schema_prompt: &str) -> Result<String> {
        let call = MockCall {
            text: text.to_string(),
            schema_prompt: schema_prompt.to_string(),
        };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(e) => e.into_inner().push(call),
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &self.behavior {
            MockBehavior::Respond(response) => Ok(response.clone()),
            MockBehavior::Fail(message) => Err(Error::Inference(message.clone())),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_response_and_call_log() {
        let backend = MockStructuringBackend::new().with_fixed_response(r#"{"a": 1}"#);
        let out = backend.generate_structured("text", "prompt").await.unwrap();
        assert_eq!(out, r#"{"a": 1}"#);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "text");
        assert_eq!(calls[0].schema_prompt, "prompt");
    }

    #[tokio::test]
    async fn test_failure() {
        let backend = MockStructuringBackend::new().with_failure("quota");
        let err = backend.generate_structured("t", "p").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let backend = MockStructuringBackend::new();
        let clone = backend.clone();
        clone.generate_structured("t", "p").await.unwrap();
        assert_eq!(backend.call_count(), 1);
    }
}
