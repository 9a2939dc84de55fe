//! Deterministic classifier stub for tests.
//!
//! Table-driven: the first entry whose trigger substring appears in the
//! prompt wins. Can also be configured to fail every call, which is how
//! the fail-safe / fail-closed paths are exercised.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::types::{Classifier, ClassifierError};

/// A (trigger, canned response) pair.
#[derive(Clone, Debug)]
pub struct StubRule {
    pub trigger: String,
    pub response: String,
}

pub struct StubClassifier {
    rules: Vec<StubRule>,
    default_response: String,
    fail_all: bool,
    calls: AtomicU64,
}

impl StubClassifier {
    /// Stub that answers `default_response` unless a rule matches.
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_response: default_response.into(),
            fail_all: false,
            calls: AtomicU64::new(0),
        }
    }

    /// Stub whose every call fails with a timeout.
    pub fn failing() -> Self {
        Self {
            rules: Vec::new(),
            default_response: String::new(),
            fail_all: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Add a canned response for prompts containing `trigger`.
    pub fn with_rule(mut self, trigger: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push(StubRule {
            trigger: trigger.into(),
            response: response.into(),
        });
        self
    }

    /// Number of classify calls received so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, prompt: &str) -> Result<String, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all {
            return Err(ClassifierError::Timeout);
        }

        for rule in &self.rules {
            if prompt.contains(&rule.trigger) {
                return Ok(rule.response.clone());
            }
        }

        Ok(self.default_response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_returns_default() {
        let stub = StubClassifier::new("DEFAULT");
        assert_eq!(stub.classify("anything").await.unwrap(), "DEFAULT");
    }

    #[tokio::test]
    async fn test_stub_rule_matches_trigger() {
        let stub = StubClassifier::new("DEFAULT").with_rule("delete", "BLOCK\ntoo risky");
        assert_eq!(
            stub.classify("please delete the files").await.unwrap(),
            "BLOCK\ntoo risky"
        );
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_stub_times_out() {
        let stub = StubClassifier::failing();
        assert!(matches!(
            stub.classify("anything").await,
            Err(ClassifierError::Timeout)
        ));
    }
}
