//! LLM-backed classifier.
//!
//! Wraps an OpenAI-compatible /v1/chat/completions endpoint. Calls run
//! at temperature zero with a bounded timeout; a timeout or malformed
//! response surfaces as a `ClassifierError` for the calling stage's fail
//! policy to resolve.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::types::{Classifier, ClassifierError};

pub struct LlmClassifier {
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    http: Client,
}

impl LlmClassifier {
    /// Create a new classifier client.
    ///
    /// * `api_url` - Base URL for the completion API (e.g. `https://api.openai.com`).
    /// * `api_key` - Authorization bearer token.
    /// * `model` - Model identifier used for every classification call.
    /// * `timeout` - Hard deadline for one call; exceeding it is a
    ///   `ClassifierError::Timeout`.
    pub fn new(api_url: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            api_url,
            api_key,
            model,
            timeout,
            http: Client::new(),
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, ClassifierError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0,
            "stream": false,
        });

        let url = format!("{}/v1/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Provider(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Provider(format!(
                "{}: {}",
                status.as_u16(),
                text
            )));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?;

        let content = data["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                ClassifierError::MalformedOutput("no completion choice in response".to_string())
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, prompt: &str) -> Result<String, ClassifierError> {
        debug!("Classifier call ({} chars)", prompt.len());

        match tokio::time::timeout(self.timeout, self.request(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout),
        }
    }
}
