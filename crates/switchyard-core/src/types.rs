use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Unique identifier for one routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier of a registered backend model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Creates a model identifier from any string-like value.
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ModelId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant identifier from any string-like value.
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of work a backend is asked to perform.
///
/// Capability tags on descriptors and the `task_type` on requests share this
/// vocabulary. The retrieval/rerank pipeline is consumed as just another task
/// type routed through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Conversational completion.
    Chat,
    /// Multi-step reasoning.
    Reasoning,
    /// Document or thread summarization.
    Summarize,
    /// Embedding computation (routed, not computed here).
    Embed,
    /// Retrieval reranking.
    Rerank,
}

impl TaskType {
    /// Whether responses for this task type are free-form generated text.
    ///
    /// Non-generative tasks fall back to the static quality prior for
    /// confidence scoring.
    #[must_use]
    pub fn is_generative(&self) -> bool {
        matches!(self, Self::Chat | Self::Reasoning | Self::Summarize)
    }
}

impl Display for TaskType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Chat => "chat",
            Self::Reasoning => "reasoning",
            Self::Summarize => "summarize",
            Self::Embed => "embed",
            Self::Rerank => "rerank",
        };
        write!(formatter, "{name}")
    }
}

/// Token accounting for one backend call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt portion of the request.
    pub input: u64,
    /// Tokens produced in the completion.
    pub output: u64,
}

impl TokenUsage {
    /// Total tokens across input and output.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// One message in an OpenAI-compatible conversation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author (`system`, `user`, or `assistant`).
    pub role: String,
    /// Textual content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a `system` message.
    pub fn system<T: Into<String>>(content: T) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.into(),
        }
    }

    /// Creates a `user` message.
    pub fn user<T: Into<String>>(content: T) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }
}

/// Normalized outbound call handed to a backend adapter.
///
/// Every registered backend, self-hosted or remote, is addressed through this
/// single OpenAI-compatible shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Backend model the call targets.
    pub model: ModelId,
    /// Conversation payload.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens allowed in the completion.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl InvokeRequest {
    /// Builds a single-turn request for the given model and prompt.
    pub fn single_turn<T: Into<String>>(model: ModelId, prompt: T) -> Self {
        Self {
            model,
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: 4096,
            temperature: 0.2,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the completion token ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Normalized response returned by a backend adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Generated text.
    pub text: String,
    /// Token accounting reported by the backend.
    pub usage: TokenUsage,
    /// Actual cost of the call in USD, as charged by the backend.
    pub cost_usd: f64,
    /// Wall-clock latency of the call in milliseconds.
    pub latency_ms: u64,
}

/// Normalized inbound request consumed from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Unique identifier, generated at normalization time.
    pub request_id: RequestId,
    /// Tenant issuing the request.
    pub tenant_id: TenantId,
    /// Kind of work requested.
    pub task_type: TaskType,
    /// Prompt or task payload.
    pub payload: String,
    /// Retrieval context for grounded tasks, empty otherwise.
    #[serde(default)]
    pub retrieval_context: Vec<String>,
    /// Optional per-request privacy requirement, tightening the tenant policy.
    #[serde(default)]
    pub privacy_requirement: Option<crate::descriptor::PrivacyTier>,
    /// Optional per-request cost ceiling in USD.
    #[serde(default)]
    pub max_cost: Option<f64>,
}

impl RouteRequest {
    /// Creates a request with a fresh id and no optional constraints.
    pub fn new<T: Into<String>>(tenant_id: TenantId, task_type: TaskType, payload: T) -> Self {
        Self {
            request_id: RequestId::new(),
            tenant_id,
            task_type,
            payload: payload.into(),
            retrieval_context: Vec::new(),
            privacy_requirement: None,
            max_cost: None,
        }
    }

    /// Attaches retrieval context for grounded confidence scoring.
    #[must_use]
    pub fn with_retrieval_context(mut self, context: Vec<String>) -> Self {
        self.retrieval_context = context;
        self
    }

    /// Tightens the privacy requirement for this request only.
    #[must_use]
    pub fn with_privacy_requirement(mut self, tier: crate::descriptor::PrivacyTier) -> Self {
        self.privacy_requirement = Some(tier);
        self
    }

    /// Caps the cost of this request in USD.
    #[must_use]
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PrivacyTier;

    #[test]
    fn test_request_ids_are_unique() {
        let first = RequestId::new();
        let second = RequestId::new();
        assert_ne!(first, second);
    }

    #[test]
    fn test_task_type_generative() {
        assert!(TaskType::Chat.is_generative());
        assert!(TaskType::Reasoning.is_generative());
        assert!(!TaskType::Embed.is_generative());
        assert!(!TaskType::Rerank.is_generative());
    }

    #[test]
    fn test_task_type_serde_snake_case() -> anyhow::Result<()> {
        let json = serde_json::to_string(&TaskType::Summarize)?;
        assert_eq!(json, "\"summarize\"");
        let back: TaskType = serde_json::from_str("\"rerank\"")?;
        assert_eq!(back, TaskType::Rerank);
        Ok(())
    }

    #[test]
    fn test_route_request_builders() {
        let request = RouteRequest::new(TenantId::new("acme"), TaskType::Chat, "hello")
            .with_privacy_requirement(PrivacyTier::LocalOnly)
            .with_max_cost(0.05);

        assert_eq!(request.tenant_id.as_str(), "acme");
        assert_eq!(request.privacy_requirement, Some(PrivacyTier::LocalOnly));
        assert_eq!(request.max_cost, Some(0.05));
        assert!(request.retrieval_context.is_empty());
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input: 120,
            output: 30,
        };
        assert_eq!(usage.total(), 150);
    }
}
