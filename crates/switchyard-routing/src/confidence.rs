//! Confidence estimation for cascade escalation.
//!
//! Estimators score a produced response in [0, 1]; the gateway escalates to
//! the next candidate when the score falls below the tenant's threshold.
//! Estimation must never fail a request: estimators degrade to a neutral
//! score internally rather than returning an error.

use crate::scorecard::ScorecardStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{BackendAdapter, InvokeRequest, InvokeResponse, RouteRequest, TaskType};

/// Neutral score used whenever an estimator cannot produce a signal.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Scores a response's trustworthiness in [0, 1].
#[async_trait]
pub trait ConfidenceEstimator: Send + Sync {
    /// Estimator name, recorded alongside the score in the decision record.
    fn name(&self) -> &str;

    /// Scores the response. Infallible: estimator failures degrade to
    /// [`NEUTRAL_CONFIDENCE`] instead of surfacing.
    async fn estimate(&self, request: &RouteRequest, response: &InvokeResponse) -> f64;
}

/// Agreement across resampled generations of the same prompt.
///
/// Draws extra samples at elevated temperature from a designated sampler
/// backend and measures token-level agreement with the primary response.
/// Doubles or triples effective cost for the call, so deployments gate it
/// behind `ConsistencySettings::enabled`.
pub struct SelfConsistencyEstimator {
    sampler: Arc<dyn BackendAdapter>,
    samples: usize,
    sample_timeout: Duration,
}

impl SelfConsistencyEstimator {
    /// Creates an estimator drawing `samples` extra generations.
    #[must_use]
    pub fn new(sampler: Arc<dyn BackendAdapter>, samples: usize) -> Self {
        Self {
            sampler,
            samples: samples.max(1),
            sample_timeout: Duration::from_secs(20),
        }
    }

    /// Overrides the per-sample timeout.
    #[must_use]
    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }
}

#[async_trait]
impl ConfidenceEstimator for SelfConsistencyEstimator {
    fn name(&self) -> &str {
        "self_consistency"
    }

    async fn estimate(&self, request: &RouteRequest, response: &InvokeResponse) -> f64 {
        let sampler_model = switchyard_core::ModelId::new(self.sampler.name());
        let invoke = InvokeRequest::single_turn(sampler_model, request.payload.clone())
            .with_temperature(0.9);

        let draws = (0..self.samples).map(|_| {
            let invoke = invoke.clone();
            async move {
                tokio::time::timeout(self.sample_timeout, self.sampler.invoke(&invoke)).await
            }
        });
        let outcomes = futures::future::join_all(draws).await;

        let mut scores = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Ok(sample)) => scores.push(token_overlap(&response.text, &sample.text)),
                Ok(Err(error)) => {
                    tracing::debug!(%error, "consistency sample failed, skipping");
                }
                Err(_) => {
                    tracing::debug!("consistency sample timed out, skipping");
                }
            }
        }

        if scores.is_empty() {
            // All samples failed: no signal either way.
            return NEUTRAL_CONFIDENCE;
        }
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Fraction of response sentences that overlap the supplied retrieval
/// context. Only meaningful when the request carried context; otherwise
/// neutral.
pub struct GroundingEstimator;

#[async_trait]
impl ConfidenceEstimator for GroundingEstimator {
    fn name(&self) -> &str {
        "grounding"
    }

    async fn estimate(&self, request: &RouteRequest, response: &InvokeResponse) -> f64 {
        if request.retrieval_context.is_empty() {
            return NEUTRAL_CONFIDENCE;
        }
        let context_tokens: HashSet<String> = request
            .retrieval_context
            .iter()
            .flat_map(|chunk| tokens(chunk))
            .collect();
        if context_tokens.is_empty() {
            return NEUTRAL_CONFIDENCE;
        }

        let sentences: Vec<&str> = response
            .text
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .collect();
        if sentences.is_empty() {
            return NEUTRAL_CONFIDENCE;
        }

        let grounded = sentences
            .iter()
            .filter(|sentence| {
                let sentence_tokens: Vec<String> = tokens(sentence).collect();
                if sentence_tokens.is_empty() {
                    return false;
                }
                let hits = sentence_tokens
                    .iter()
                    .filter(|token| context_tokens.contains(*token))
                    .count();
                hits * 2 >= sentence_tokens.len()
            })
            .count();
        grounded as f64 / sentences.len() as f64
    }
}

/// Historical accept rate of the serving backend, read off its active
/// scorecard. Zero marginal cost; the fallback when richer signals are
/// disabled or inapplicable.
pub struct StaticPriorEstimator {
    scorecards: Arc<ScorecardStore>,
}

impl StaticPriorEstimator {
    /// Creates an estimator over the given store.
    #[must_use]
    pub fn new(scorecards: Arc<ScorecardStore>) -> Self {
        Self { scorecards }
    }

    /// Logistic squash of a quality z-score into [0, 1].
    fn squash(quality_z: f64) -> f64 {
        1.0 / (1.0 + (-quality_z).exp())
    }

    /// Scores a backend for one task from the active snapshot.
    #[must_use]
    pub fn score_model(
        &self,
        model: &switchyard_core::ModelId,
        task_type: TaskType,
    ) -> f64 {
        self.scorecards
            .load()
            .card(model, task_type)
            .map_or(NEUTRAL_CONFIDENCE, |card| Self::squash(card.quality_z))
    }
}

/// Picks the right estimator per request, per the deployment settings.
///
/// Generative tasks use self-consistency when enabled, else grounding when
/// the request carries retrieval context, else the static prior.
/// Non-generative tasks (embed, rerank) always use the static prior.
pub struct CompositeEstimator {
    consistency: Option<SelfConsistencyEstimator>,
    grounding: GroundingEstimator,
    scorecards: Arc<ScorecardStore>,
}

impl CompositeEstimator {
    /// Creates a composite with self-consistency disabled.
    #[must_use]
    pub fn new(scorecards: Arc<ScorecardStore>) -> Self {
        Self {
            consistency: None,
            grounding: GroundingEstimator,
            scorecards,
        }
    }

    /// Enables the self-consistency path with the given sampler.
    #[must_use]
    pub fn with_consistency(mut self, estimator: SelfConsistencyEstimator) -> Self {
        self.consistency = Some(estimator);
        self
    }

    /// Scores `response`, produced by `model`, for `request`.
    pub async fn estimate_for(
        &self,
        model: &switchyard_core::ModelId,
        request: &RouteRequest,
        response: &InvokeResponse,
    ) -> (String, f64) {
        let prior = StaticPriorEstimator::new(Arc::clone(&self.scorecards));

        if !request.task_type.is_generative() {
            return (
                "static_prior".to_owned(),
                prior.score_model(model, request.task_type),
            );
        }
        if let Some(consistency) = &self.consistency {
            let score = consistency.estimate(request, response).await;
            return (consistency.name().to_owned(), score);
        }
        if !request.retrieval_context.is_empty() {
            let score = self.grounding.estimate(request, response).await;
            return (self.grounding.name().to_owned(), score);
        }
        (
            "static_prior".to_owned(),
            prior.score_model(model, request.task_type),
        )
    }
}

/// Lowercased alphanumeric tokens of a text.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Jaccard overlap of the token sets of two texts.
fn token_overlap(left: &str, right: &str) -> f64 {
    let left_tokens: HashSet<String> = tokens(left).collect();
    let right_tokens: HashSet<String> = tokens(right).collect();
    if left_tokens.is_empty() && right_tokens.is_empty() {
        return 1.0;
    }
    let intersection = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorecard::{ScoreCard, ScorecardSnapshot};
    use switchyard_core::{ModelId, TenantId, TokenUsage};
    use switchyard_providers::MockAdapter;

    fn response(text: &str) -> InvokeResponse {
        InvokeResponse {
            text: text.to_owned(),
            usage: TokenUsage::default(),
            cost_usd: 0.001,
            latency_ms: 50,
        }
    }

    fn chat_request(payload: &str) -> RouteRequest {
        RouteRequest::new(TenantId::new("acme"), TaskType::Chat, payload)
    }

    #[test]
    fn test_token_overlap() {
        assert!((token_overlap("the sky is blue", "the sky is blue") - 1.0).abs() < 1e-9);
        assert!(token_overlap("alpha beta", "gamma delta") < 1e-9);
        let partial = token_overlap("alpha beta gamma", "alpha beta delta");
        assert!(partial > 0.4 && partial < 0.6);
    }

    #[tokio::test]
    async fn test_consistency_agreement_high_when_samples_match() {
        let sampler = Arc::new(MockAdapter::new("sampler").with_default_response("paris is the capital"));
        let estimator = SelfConsistencyEstimator::new(sampler, 2);

        let score = estimator
            .estimate(&chat_request("capital of france?"), &response("paris is the capital"))
            .await;
        assert!(score > 0.9, "score was {score}");
    }

    #[tokio::test]
    async fn test_consistency_degrades_to_neutral_when_sampler_down() {
        let sampler = Arc::new(MockAdapter::new("sampler"));
        sampler.push_failures(4, "sampler offline");
        let estimator = SelfConsistencyEstimator::new(sampler, 2);

        let score = estimator
            .estimate(&chat_request("anything"), &response("an answer"))
            .await;
        assert!((score - NEUTRAL_CONFIDENCE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_grounding_neutral_without_context() {
        let score = GroundingEstimator
            .estimate(&chat_request("hello"), &response("hi there"))
            .await;
        assert!((score - NEUTRAL_CONFIDENCE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_grounding_scores_supported_sentences() {
        let request = chat_request("summarize").with_retrieval_context(vec![
            "revenue grew twelve percent in the third quarter".to_owned(),
        ]);
        let grounded = GroundingEstimator
            .estimate(&request, &response("Revenue grew twelve percent."))
            .await;
        assert!(grounded > 0.9);

        let ungrounded = GroundingEstimator
            .estimate(&request, &response("Unrelated speculation about weather."))
            .await;
        assert!(ungrounded < 0.1);
    }

    #[tokio::test]
    async fn test_static_prior_squashes_quality() {
        let snapshot = ScorecardSnapshot::empty().with_card(
            ModelId::new("strong"),
            TaskType::Embed,
            ScoreCard::from_prior(2.0),
        );
        let store = Arc::new(ScorecardStore::new(snapshot));
        let prior = StaticPriorEstimator::new(store);

        let strong = prior.score_model(&ModelId::new("strong"), TaskType::Embed);
        assert!(strong > 0.85);

        let unknown = prior.score_model(&ModelId::new("unknown"), TaskType::Embed);
        assert!((unknown - NEUTRAL_CONFIDENCE).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_composite_routes_non_generative_to_prior() {
        let store = Arc::new(ScorecardStore::new(ScorecardSnapshot::empty()));
        let composite = CompositeEstimator::new(store);
        let request = RouteRequest::new(TenantId::new("acme"), TaskType::Embed, "vectorize this");

        let (name, score) = composite
            .estimate_for(&ModelId::new("embedder"), &request, &response("[...]"))
            .await;
        assert_eq!(name, "static_prior");
        assert!((score - NEUTRAL_CONFIDENCE).abs() < 1e-9);
    }
}
