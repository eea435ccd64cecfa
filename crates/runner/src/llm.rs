//! Reasoning service client
//!
//! Two wire protocols are supported:
//! - OpenAI-compatible `/v1/chat/completions` (OpenAI, vLLM, LiteLLM, ...)
//! - Ollama `/api/generate`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RunnerError, RunnerResult};

/// Sampling parameters for one completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Request/response language model capability
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Text of a single completion for `prompt`; `None` when the service
    /// answered without any content.
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> RunnerResult<Option<String>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Ollama,
}

/// Reasoning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Defaults to the provider's public endpoint
    pub base_url: Option<String>,
    pub model: String,
    /// Bearer token for OpenAI-compatible endpoints
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            max_tokens: 2000,
            temperature: 0.7,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn base_url(&self) -> String {
        let url = match (&self.base_url, self.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com".to_string(),
            (None, LlmProvider::Ollama) => "http://127.0.0.1:11434".to_string(),
        };
        url.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone)]
enum LlmBackend {
    OpenAi { base_url: String, api_key: Option<String> },
    Ollama { base_url: String },
}

/// HTTP client for the configured reasoning service
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    backend: LlmBackend,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> RunnerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let backend = match config.provider {
            LlmProvider::OpenAi => LlmBackend::OpenAi {
                base_url: config.base_url(),
                api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            },
            LlmProvider::Ollama => LlmBackend::Ollama {
                base_url: config.base_url(),
            },
        };

        if let LlmBackend::OpenAi { api_key: None, .. } = &backend {
            warn!("No API key configured for the reasoning service; requests are sent unauthenticated");
        }

        Ok(Self { http, backend })
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> RunnerResult<serde_json::Value> {
        let mut request = self.http.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(RunnerError::Reasoning(format!("{} returned {}: {}", url, status, snippet)));
        }

        Ok(response.json::<serde_json::Value>().await?)
    }
}

#[async_trait]
impl ReasoningService for LlmClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> RunnerResult<Option<String>> {
        let content = match &self.backend {
            LlmBackend::OpenAi { base_url, api_key } => {
                let url = format!("{}/v1/chat/completions", base_url);
                let body = serde_json::json!({
                    "model": options.model,
                    "messages": [
                        {"role": "user", "content": prompt},
                    ],
                    "max_tokens": options.max_tokens,
                    "temperature": options.temperature,
                });
                let json = self.post_json(&url, api_key.as_deref(), &body).await?;
                json.pointer("/choices/0/message/content")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            }
            LlmBackend::Ollama { base_url } => {
                let url = format!("{}/api/generate", base_url);
                let body = serde_json::json!({
                    "model": options.model,
                    "prompt": prompt,
                    "stream": false,
                    "options": {
                        "temperature": options.temperature,
                        "num_predict": options.max_tokens,
                    },
                });
                let json = self.post_json(&url, None, &body).await?;
                json.get("response").and_then(|v| v.as_str()).map(String::from)
            }
        };

        debug!(
            "Completion returned {} chars",
            content.as_ref().map(|c| c.len()).unwrap_or(0)
        );
        Ok(content.filter(|c| !c.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn options() -> CompletionOptions {
        LlmConfig::default().completion_options()
    }

    #[test]
    fn test_defaults_match_reference_sampling() {
        let opts = options();
        assert_eq!(opts.model, "gpt-4o-mini");
        assert_eq!(opts.max_tokens, 2000);
        assert!(opts.temperature > 0.0);
    }

    #[test]
    fn test_base_url_defaults_per_provider() {
        let mut config = LlmConfig::default();
        assert_eq!(config.base_url(), "https://api.openai.com");

        config.provider = LlmProvider::Ollama;
        assert_eq!(config.base_url(), "http://127.0.0.1:11434");

        config.base_url = Some("http://vllm.local:8000/".to_string());
        assert_eq!(config.base_url(), "http://vllm.local:8000");
    }

    #[tokio::test]
    async fn test_openai_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"explanation\":\"x\"}"}}]
                }));
            })
            .await;

        let client = LlmClient::new(&LlmConfig {
            base_url: Some(server.base_url()),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap();

        let text = client.complete("why?", &options()).await.unwrap();
        assert_eq!(text.as_deref(), Some("{\"explanation\":\"x\"}"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ollama_completion() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(serde_json::json!({"model": "llama3", "response": "hello", "done": true}));
            })
            .await;

        let client = LlmClient::new(&LlmConfig {
            provider: LlmProvider::Ollama,
            base_url: Some(server.base_url()),
            model: "llama3".to_string(),
            ..Default::default()
        })
        .unwrap();

        let text = client.complete("why?", &options()).await.unwrap();
        assert_eq!(text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_error_status_is_reasoning_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("quota exceeded");
            })
            .await;

        let client = LlmClient::new(&LlmConfig {
            base_url: Some(server.base_url()),
            ..Default::default()
        })
        .unwrap();

        let err = client.complete("why?", &options()).await.unwrap_err();
        match err {
            RunnerError::Reasoning(msg) => assert!(msg.contains("429") && msg.contains("quota exceeded")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({"choices": []}));
            })
            .await;

        let client = LlmClient::new(&LlmConfig {
            base_url: Some(server.base_url()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(client.complete("why?", &options()).await.unwrap(), None);
    }
}
