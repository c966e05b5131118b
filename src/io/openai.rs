//! OpenAI-compatible chat-completions classifier
//!
//! Sends one prompt per message and hands the reply content to
//! `services::classify` for interpretation. Only a reply that arrived and
//! carries content can be interpreted; anything else is
//! `RelayError::ClassifierUnavailable`.

use crate::domain::currency::Currency;
use crate::domain::error::RelayError;
use crate::domain::expense::Classification;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::secrets::Secret;
use crate::services::classify::{build_prompt, parse_reply, Classifier, Parsed, SYSTEM_PROMPT};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct OpenAiClassifier {
    client: Client,
    api_key: Secret,
    /// Base URL without trailing slash (overridable for testing)
    api_base: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: u32,
    base_currency: Currency,
    metrics: Option<Arc<Metrics>>,
}

impl OpenAiClassifier {
    pub fn new(config: &Config, api_key: Secret) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.classifier_timeout_ms()))
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build classifier client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_base: config.classifier_api_base().trim_end_matches('/').to_string(),
            model: config.model().to_string(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
            base_currency: config.base_currency().clone(),
            metrics: None,
        })
    }

    /// Count fallback parses in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one completion and return the reply content
    async fn complete(&self, prompt: &str) -> Result<String, RelayError> {
        let url = format!("{}/v1/chat/completions", self.api_base);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::ClassifierUnavailable("request timed out".to_string())
                } else {
                    RelayError::ClassifierUnavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(RelayError::ClassifierUnavailable(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RelayError::ClassifierUnavailable(format!("malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RelayError::ClassifierUnavailable("response had no content".to_string()))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, RelayError> {
        let content = self.complete(&build_prompt(text)).await?;
        debug!(content = %content, "classifier_reply");

        match parse_reply(&content, text, &self.base_currency) {
            Parsed::Structured(c) => Ok(c),
            Parsed::Fallback(c) => {
                warn!(content = %content, "classifier_reply_not_json");
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback_parse();
                }
                Ok(c)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::expense::TransactionKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(server: &MockServer) -> OpenAiClassifier {
        let config = Config::default().with_api_bases(&server.uri());
        OpenAiClassifier::new(&config, Secret::new("sk-test")).unwrap()
    }

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn test_successful_classification() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini", "max_tokens": 500})))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                r#"{"type":"Expense","amount":100,"currency":"RUB","category":"Restaurants & Cafes","description":"Coffee"}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let c = classifier(&server).classify("100₽ coffee").await.unwrap();
        assert_eq!(c.kind, TransactionKind::Expense);
        assert_eq!(c.amount, 10000);
        assert_eq!(c.currency, Some(Currency::Rub));
        assert_eq!(c.description, "Coffee");
    }

    #[tokio::test]
    async fn test_non_json_reply_uses_fallback() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("I think it was a salary")))
            .mount(&server)
            .await;

        let metrics = Arc::new(Metrics::new());
        let c = classifier(&server)
            .with_metrics(metrics.clone())
            .classify("salary 5000")
            .await
            .unwrap();
        assert_eq!(c.kind, TransactionKind::Income);
        assert_eq!(c.amount, 500000);
        assert_eq!(metrics.snapshot().fallback_parses, 1);
    }

    #[tokio::test]
    async fn test_http_error_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("coffee 5").await.unwrap_err();
        match err {
            RelayError::ClassifierUnavailable(msg) => {
                assert!(msg.contains("401"), "unexpected message: {msg}");
                assert!(msg.contains("Incorrect API key"), "unexpected message: {msg}");
            }
            other => panic!("Expected ClassifierUnavailable, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("coffee 5").await.unwrap_err();
        assert!(matches!(err, RelayError::ClassifierUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        let config = Config::default().with_api_bases("http://127.0.0.1:1");
        let classifier = OpenAiClassifier::new(&config, Secret::new("k")).unwrap();
        let err = classifier.classify("coffee 5").await.unwrap_err();
        assert!(matches!(err, RelayError::ClassifierUnavailable(_)));
    }
}
