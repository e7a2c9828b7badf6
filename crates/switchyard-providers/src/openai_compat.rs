use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Instant;
use switchyard_core::{
    BackendAdapter, Error, InvokeRequest, InvokeResponse, Result, TokenUsage,
};

/// Adapter for any backend speaking the OpenAI chat-completions protocol.
///
/// Covers self-hosted servers (vLLM, TGI, Ollama in compatibility mode) and
/// remote APIs alike; only the base URL, API key, and pricing differ.
pub struct OpenAiCompatAdapter {
    /// HTTP client for API requests.
    client: Client,
    /// Adapter name reported in telemetry.
    name: String,
    /// Base URL of the chat-completions endpoint.
    base_url: String,
    /// Bearer token, empty for unauthenticated self-hosted servers.
    api_key: String,
    /// Price in USD per 1k tokens, used when the backend reports no cost.
    cost_per_1k_tokens: f64,
}

impl OpenAiCompatAdapter {
    /// Creates an adapter for the given endpoint.
    pub fn new<T: Into<String>, U: Into<String>>(name: T, base_url: U) -> Self {
        Self {
            client: Client::default(),
            name: name.into(),
            base_url: base_url.into(),
            api_key: String::new(),
            cost_per_1k_tokens: 0.0,
        }
    }

    /// Creates an adapter reading its API key from the given environment
    /// variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable is not set.
    pub fn from_env<T: Into<String>, U: Into<String>>(
        name: T,
        base_url: U,
        env_key: &str,
    ) -> Result<Self> {
        let api_key = env::var(env_key).map_err(|_| Error::MissingApiKey(env_key.to_owned()))?;
        Ok(Self::new(name, base_url).with_api_key(api_key))
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the price used when the backend reports no cost of its own.
    #[must_use]
    pub fn with_cost_per_1k_tokens(mut self, cost_per_1k_tokens: f64) -> Self {
        self.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }
}

/// Request payload sent to the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    /// Model identifier understood by the backend.
    model: String,
    /// Conversation messages.
    messages: Vec<WireMessage>,
    /// Sampling temperature.
    temperature: f32,
    /// Completion token ceiling.
    max_tokens: usize,
}

/// Message on the wire.
#[derive(Debug, Serialize)]
struct WireMessage {
    /// Role of the message author.
    role: String,
    /// Textual content.
    content: String,
}

/// Response payload returned by the backend.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    /// Candidate completions.
    choices: Vec<WireChoice>,
    /// Token accounting, absent on some self-hosted servers.
    usage: Option<WireUsage>,
}

/// One completion choice.
#[derive(Debug, Deserialize)]
struct WireChoice {
    /// Generated message.
    message: WireResponseMessage,
}

/// Generated message content.
#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    /// Generated text.
    content: String,
}

/// Token usage metrics.
#[derive(Debug, Deserialize)]
struct WireUsage {
    /// Prompt tokens.
    prompt_tokens: u64,
    /// Completion tokens.
    completion_tokens: u64,
}

#[async_trait]
impl BackendAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        let start = Instant::now();

        let wire_request = ChatCompletionRequest {
            model: request.model.to_string(),
            messages: request
                .messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role.clone(),
                    content: message.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder
            .json(&wire_request)
            .send()
            .await
            .map_err(|error| Error::Backend(format!("{} request failed: {error}", self.name)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            return Err(Error::Backend(format!(
                "{} error {status}: {error_text}",
                self.name
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|error| {
            Error::InvalidResponse(format!("failed to parse {} response: {error}", self.name))
        })?;

        let latency_ms = start.elapsed().as_millis() as u64;

        let text = completion
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                Error::InvalidResponse(format!("no completion returned by {}", self.name))
            })?;

        let usage = completion.usage.map_or_else(TokenUsage::default, |usage| {
            TokenUsage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
            }
        });

        let cost_usd = (usage.total() as f64 / 1000.0) * self.cost_per_1k_tokens;

        Ok(InvokeResponse {
            text,
            usage,
            cost_usd,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ModelId;

    #[test]
    fn test_adapter_builders() {
        let adapter = OpenAiCompatAdapter::new("vllm", "http://localhost:8000/v1/chat/completions")
            .with_cost_per_1k_tokens(0.0002);
        assert_eq!(adapter.name(), "vllm");
        assert!((adapter.cost_per_1k_tokens - 0.0002).abs() < f64::EPSILON);
        assert!(adapter.api_key.is_empty());
    }

    #[test]
    fn test_from_env_missing_key() {
        let result = OpenAiCompatAdapter::from_env(
            "together",
            "https://api.together.xyz/v1/chat/completions",
            "SWITCHYARD_TEST_MISSING_KEY",
        );
        assert!(matches!(result, Err(Error::MissingApiKey(_))));
    }

    #[test]
    fn test_wire_request_shape() -> anyhow::Result<()> {
        let request = InvokeRequest::single_turn(ModelId::new("llama-3.1-8b"), "ping");
        let wire = ChatCompletionRequest {
            model: request.model.to_string(),
            messages: vec![WireMessage {
                role: "user".to_owned(),
                content: "ping".to_owned(),
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let json = serde_json::to_value(&wire)?;
        assert_eq!(json["model"], "llama-3.1-8b");
        assert_eq!(json["messages"][0]["role"], "user");
        Ok(())
    }
}
