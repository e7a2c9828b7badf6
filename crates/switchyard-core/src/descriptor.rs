//! Backend descriptors: the static catalogue entry for one model backend.

use crate::types::{ModelId, TaskType};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Where a backend runs, which determines its billing and privacy posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Runs on infrastructure we operate (vLLM, TGI, Ollama-style).
    SelfHosted,
    /// Runs on a third-party API.
    Remote,
}

/// Privacy tier of a backend, matched against tenant policy.
///
/// Ordered from most to least restrictive: a tenant allowing `Open` data may
/// still use `LocalOnly` backends, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyTier {
    /// Data never leaves our infrastructure.
    LocalOnly,
    /// Data may leave under a data-processing agreement.
    Restricted,
    /// No data-residency constraint.
    Open,
}

impl Display for PrivacyTier {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::LocalOnly => "local-only",
            Self::Restricted => "restricted",
            Self::Open => "open",
        };
        write!(formatter, "{name}")
    }
}

/// Identity and static properties of one registered backend.
///
/// Immutable once registered: updates go through re-registration with a
/// bumped `revision`, which retires the old descriptor rather than mutating
/// it in place. In-flight routing decisions keep reading the snapshot they
/// started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique backend identifier.
    pub id: ModelId,
    /// Where the backend runs.
    pub provider: ProviderKind,
    /// Task types this backend can serve.
    pub task_capabilities: Vec<TaskType>,
    /// Privacy tier of the backend.
    pub privacy_tier: PrivacyTier,
    /// List price in USD per 1k tokens equivalent.
    pub cost_per_unit: f64,
    /// Maximum context window in tokens.
    pub max_context: usize,
    /// Monotonic revision, bumped on re-registration.
    #[serde(default)]
    pub revision: u32,
    /// External leaderboard row used as quality prior (arena Elo for
    /// generative tasks, MTEB for embed/rerank), if any.
    #[serde(default)]
    pub benchmark_ref: Option<String>,
}

impl ModelDescriptor {
    /// Creates a descriptor with the given identity and placement.
    pub fn new<T: Into<ModelId>>(id: T, provider: ProviderKind, privacy_tier: PrivacyTier) -> Self {
        Self {
            id: id.into(),
            provider,
            task_capabilities: Vec::new(),
            privacy_tier,
            cost_per_unit: 0.0,
            max_context: 8192,
            revision: 0,
            benchmark_ref: None,
        }
    }

    /// Sets the task capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<TaskType>) -> Self {
        self.task_capabilities = capabilities;
        self
    }

    /// Sets the list price per 1k tokens.
    #[must_use]
    pub fn with_cost_per_unit(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    /// Sets the context window.
    #[must_use]
    pub fn with_max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    /// Sets the external benchmark reference.
    #[must_use]
    pub fn with_benchmark_ref<T: Into<String>>(mut self, benchmark_ref: T) -> Self {
        self.benchmark_ref = Some(benchmark_ref.into());
        self
    }

    /// Whether this backend can serve the given task type.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.task_capabilities.contains(&task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_tier_ordering() {
        assert!(PrivacyTier::LocalOnly < PrivacyTier::Restricted);
        assert!(PrivacyTier::Restricted < PrivacyTier::Open);
    }

    #[test]
    fn test_descriptor_supports() {
        let descriptor = ModelDescriptor::new(
            "llama-3.1-8b",
            ProviderKind::SelfHosted,
            PrivacyTier::LocalOnly,
        )
        .with_capabilities(vec![TaskType::Chat, TaskType::Summarize]);

        assert!(descriptor.supports(TaskType::Chat));
        assert!(!descriptor.supports(TaskType::Embed));
    }

    #[test]
    fn test_descriptor_toml_round_trip() -> anyhow::Result<()> {
        let descriptor =
            ModelDescriptor::new("gpt-4o-mini", ProviderKind::Remote, PrivacyTier::Open)
                .with_capabilities(vec![TaskType::Chat])
                .with_cost_per_unit(0.0006)
                .with_benchmark_ref("arena:gpt-4o-mini");

        let text = toml::to_string(&descriptor)?;
        let back: ModelDescriptor = toml::from_str(&text)?;
        assert_eq!(back, descriptor);
        Ok(())
    }
}
