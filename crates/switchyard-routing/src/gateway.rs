//! The gateway: one entry point that runs a request through policy
//! selection, the cascade, confidence checks, and telemetry.

use crate::breaker::{Admission, CircuitBreakerManager};
use crate::budget::BudgetLedger;
use crate::confidence::{CompositeEstimator, SelfConsistencyEstimator};
use crate::error::DecisionTrail;
use crate::policy::{PolicyEngine, PolicyInputs, RequestMeta, UtilityWeights};
use crate::registry::{AdapterRegistry, ModelRegistry};
use crate::scorecard::ScorecardStore;
use crate::telemetry::{
    AttemptRecord, Outcome, PolicyOverride, RoutingDecision, TelemetrySink, UserFeedback,
};
use crate::{Result, RoutingError};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchyard_core::{
    GatewaySettings, InvokeRequest, InvokeResponse, ModelId, RouteRequest, TenantPolicyDocument,
};

/// What the caller gets back from a routed request.
#[derive(Debug, Clone)]
pub struct RouteResponse {
    /// Request identifier, for feedback correlation.
    pub request_id: switchyard_core::RequestId,
    /// Backend that produced the response.
    pub model: ModelId,
    /// Response text.
    pub text: String,
    /// Confidence score of the returned response.
    pub confidence: f64,
    /// Estimator that produced the score.
    pub estimator: String,
    /// Terminal outcome; `LowConfidenceExhausted` flags a response returned
    /// below the tenant's threshold.
    pub outcome: Outcome,
    /// Total billed cost across all attempts, USD.
    pub cost_usd: f64,
    /// End-to-end latency.
    pub latency_ms: u64,
}

/// Best response seen so far in a cascade that has not yet cleared the
/// confidence threshold.
struct BestSoFar {
    model: ModelId,
    response: InvokeResponse,
    confidence: f64,
    estimator: String,
}

/// Emits exactly one decision record per request.
///
/// Holding the guard across every await point means a caller that drops the
/// future mid-cascade still produces a `cancelled` record when the guard
/// drops.
struct DecisionGuard {
    decision: Option<RoutingDecision>,
    sink: Arc<TelemetrySink>,
    started: Instant,
}

impl DecisionGuard {
    fn new(decision: RoutingDecision, sink: Arc<TelemetrySink>, started: Instant) -> Self {
        Self {
            decision: Some(decision),
            sink,
            started,
        }
    }

    fn push_attempt(&mut self, attempt: AttemptRecord) {
        if let Some(decision) = self.decision.as_mut() {
            decision.total_cost_usd += attempt.cost_usd;
            decision.attempts.push(attempt);
        }
    }

    fn exclude(&mut self, excluded: crate::policy::ExcludedCandidate) {
        if let Some(decision) = self.decision.as_mut() {
            decision.excluded.push(excluded);
        }
    }

    /// Emits the record with the given terminal outcome; the drop path is
    /// then disarmed.
    fn finish(mut self, outcome: Outcome, chosen: Option<ModelId>) {
        if let Some(mut decision) = self.decision.take() {
            decision.outcome = outcome;
            decision.chosen = chosen;
            decision.total_latency_ms = self.started.elapsed().as_millis() as u64;
            decision.recorded_at = Utc::now();
            self.sink.record_decision(decision);
        }
    }
}

impl Drop for DecisionGuard {
    fn drop(&mut self) {
        if let Some(mut decision) = self.decision.take() {
            decision.outcome = Outcome::Cancelled;
            decision.total_latency_ms = self.started.elapsed().as_millis() as u64;
            decision.recorded_at = Utc::now();
            self.sink.record_decision(decision);
        }
    }
}

/// The inference routing gateway.
///
/// Pure over its injected state: registry, scorecards, breakers, and budgets
/// are all explicit, so tests freeze them and assert on the one decision
/// record each call emits.
pub struct Gateway {
    engine: PolicyEngine,
    models: Arc<ModelRegistry>,
    adapters: Arc<AdapterRegistry>,
    scorecards: Arc<ScorecardStore>,
    breakers: Arc<CircuitBreakerManager>,
    budgets: Arc<BudgetLedger>,
    telemetry: Arc<TelemetrySink>,
    estimator: CompositeEstimator,
    tenants: TenantPolicyDocument,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a gateway over the given registries, scorecards, and
    /// telemetry sink, with default breakers, budgets, and estimators.
    #[must_use]
    pub fn new(
        models: Arc<ModelRegistry>,
        adapters: Arc<AdapterRegistry>,
        scorecards: Arc<ScorecardStore>,
        telemetry: Arc<TelemetrySink>,
    ) -> Self {
        let estimator = CompositeEstimator::new(Arc::clone(&scorecards));
        Self {
            engine: PolicyEngine::default(),
            models,
            adapters,
            scorecards,
            breakers: Arc::new(CircuitBreakerManager::default()),
            budgets: Arc::new(BudgetLedger::new()),
            telemetry,
            estimator,
            tenants: TenantPolicyDocument::default(),
        }
    }

    /// Builds a gateway from deployment settings: utility weights, breaker
    /// tuning, the telemetry log path, and the optional self-consistency
    /// sampler.
    ///
    /// # Errors
    ///
    /// Returns an error when the telemetry log cannot be opened, or when
    /// consistency sampling is enabled without a registered sampler model.
    pub fn from_settings(
        settings: &GatewaySettings,
        models: Arc<ModelRegistry>,
        adapters: Arc<AdapterRegistry>,
        scorecards: Arc<ScorecardStore>,
    ) -> Result<Self> {
        let telemetry = Arc::new(TelemetrySink::open(settings.telemetry_path.clone())?);

        let mut estimator = CompositeEstimator::new(Arc::clone(&scorecards));
        if settings.consistency.enabled {
            let sampler_id = settings
                .consistency
                .sampler_model
                .as_deref()
                .map(ModelId::new)
                .ok_or_else(|| {
                    RoutingError::Config(
                        "consistency sampling enabled without a sampler_model".to_owned(),
                    )
                })?;
            let sampler = adapters.get(&sampler_id)?;
            estimator = estimator.with_consistency(SelfConsistencyEstimator::new(
                sampler,
                settings.consistency.samples,
            ));
        }

        Ok(Self::new(models, adapters, scorecards, telemetry)
            .with_weights(UtilityWeights {
                cost: settings.cost_weight,
                latency: settings.latency_weight,
            })
            .with_breakers(Arc::new(CircuitBreakerManager::new(settings.breaker.into())))
            .with_estimator(estimator))
    }

    /// Overrides the deployment-default utility weights.
    #[must_use]
    pub fn with_weights(mut self, weights: UtilityWeights) -> Self {
        self.engine = PolicyEngine::new(weights);
        self
    }

    /// Installs tenant policies.
    #[must_use]
    pub fn with_tenants(mut self, tenants: TenantPolicyDocument) -> Self {
        self.tenants = tenants;
        self
    }

    /// Installs a breaker manager (for non-default thresholds).
    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerManager>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Installs a shared budget ledger.
    #[must_use]
    pub fn with_budgets(mut self, budgets: Arc<BudgetLedger>) -> Self {
        self.budgets = budgets;
        self
    }

    /// Installs a confidence estimator stack.
    #[must_use]
    pub fn with_estimator(mut self, estimator: CompositeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// The breaker manager, shared with health tooling.
    #[must_use]
    pub fn breakers(&self) -> Arc<CircuitBreakerManager> {
        Arc::clone(&self.breakers)
    }

    /// Records user feedback against an earlier request.
    pub fn record_feedback(&self, request_id: switchyard_core::RequestId, accepted: bool) {
        self.telemetry.record_feedback(UserFeedback {
            request_id,
            accepted,
            recorded_at: Utc::now(),
        });
    }

    /// Routes one request through the cascade.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::BudgetExceeded`] when the tenant cannot cover
    /// the first attempt, and [`RoutingError::NoEligibleModel`] when no
    /// candidate survived filtering or every attempt failed. A response that
    /// never cleared the confidence threshold is returned as `Ok` with the
    /// `LowConfidenceExhausted` outcome rather than an error.
    pub async fn handle(&self, request: RouteRequest) -> Result<RouteResponse> {
        let started = Instant::now();
        let policy = self.tenants.policy_for(request.tenant_id.as_str());
        let scorecards = self.scorecards.load();
        let blocked = self.breakers.blocked_models();

        let meta = RequestMeta {
            task_type: request.task_type,
            privacy_requirement: request.privacy_requirement,
            max_cost: request.max_cost,
        };
        let inputs = PolicyInputs {
            registry: &self.models,
            scorecards: &scorecards,
            blocked: &blocked,
        };
        let plan = self.engine.select_candidates(&meta, policy, &inputs);

        tracing::debug!(
            request_id = %request.request_id,
            tenant = %request.tenant_id,
            ranked = plan.ranked.len(),
            excluded = plan.excluded.len(),
            waived = plan.quality_floor_waived,
            "candidate plan computed"
        );

        let mut guard = DecisionGuard::new(
            RoutingDecision {
                request_id: request.request_id,
                tenant_id: request.tenant_id.clone(),
                task_type: request.task_type,
                recorded_at: Utc::now(),
                excluded: plan.excluded.clone(),
                ranked: plan.ranked.clone(),
                chosen: None,
                attempts: Vec::new(),
                outcome: Outcome::Cancelled,
                total_cost_usd: 0.0,
                total_latency_ms: 0,
                policy_overrides_applied: if plan.quality_floor_waived {
                    vec![PolicyOverride::QualityFloorWaived]
                } else {
                    Vec::new()
                },
                scorecard_version: scorecards.version,
            },
            Arc::clone(&self.telemetry),
            started,
        );

        if plan.ranked.is_empty() {
            let trail = DecisionTrail {
                excluded: plan.excluded,
                tried: Vec::new(),
            };
            guard.finish(Outcome::NoEligibleModel, None);
            return Err(RoutingError::NoEligibleModel { trail });
        }

        let depth = if policy.max_cascade_depth == 0 {
            1
        } else {
            policy.max_cascade_depth.min(plan.ranked.len())
        };
        let ceiling = Duration::from_millis(policy.latency_ceiling_ms);
        let mut best: Option<BestSoFar> = None;

        for (slot, model) in plan.ranked.iter().take(depth).enumerate() {
            let remaining = ceiling.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                tracing::warn!(request_id = %request.request_id, "latency ceiling reached");
                break;
            }
            let slots_left = (depth - slot) as u32;
            let slot_timeout = remaining / slots_left;

            let estimated_cost = self.estimated_cost(model, &request);
            if let Err(error) =
                self.budgets
                    .try_withdraw(&request.tenant_id, policy, estimated_cost, Instant::now())
            {
                // Mid-cascade exhaustion with a response in hand: return it
                // instead of failing the request.
                if let Some(found) = best {
                    return Ok(Self::low_confidence_response(&request, found, guard, started));
                }
                guard.finish(Outcome::BudgetExceeded, None);
                return Err(error);
            }

            let admission = self.breakers.admit(model);
            if admission == Admission::Rejected {
                self.budgets
                    .reconcile(&request.tenant_id, estimated_cost, 0.0);
                guard.exclude(crate::policy::ExcludedCandidate {
                    model: model.clone(),
                    reason: crate::policy::ExclusionReason::BreakerOpen,
                });
                continue;
            }

            match self.attempt(model, &request, slot_timeout).await {
                Ok(response) => {
                    self.breakers.record_success(model);
                    self.budgets
                        .reconcile(&request.tenant_id, estimated_cost, response.cost_usd);

                    let (estimator, confidence) =
                        self.estimator.estimate_for(model, &request, &response).await;
                    guard.push_attempt(AttemptRecord {
                        model: model.clone(),
                        latency_ms: response.latency_ms,
                        cost_usd: response.cost_usd,
                        confidence: Some(confidence),
                        estimator: Some(estimator.clone()),
                        error: None,
                    });

                    if confidence >= policy.escalate_below {
                        let total_cost = guard
                            .decision
                            .as_ref()
                            .map_or(response.cost_usd, |decision| decision.total_cost_usd);
                        guard.finish(Outcome::Success, Some(model.clone()));
                        return Ok(RouteResponse {
                            request_id: request.request_id,
                            model: model.clone(),
                            text: response.text,
                            confidence,
                            estimator,
                            outcome: Outcome::Success,
                            cost_usd: total_cost,
                            latency_ms: started.elapsed().as_millis() as u64,
                        });
                    }

                    tracing::debug!(
                        request_id = %request.request_id,
                        model = %model,
                        confidence,
                        threshold = policy.escalate_below,
                        "confidence below threshold, escalating"
                    );
                    let improved = best
                        .as_ref()
                        .is_none_or(|found| confidence > found.confidence);
                    if improved {
                        best = Some(BestSoFar {
                            model: model.clone(),
                            response,
                            confidence,
                            estimator,
                        });
                    }
                }
                Err(error) => {
                    self.breakers.record_failure(model);
                    self.budgets
                        .reconcile(&request.tenant_id, estimated_cost, 0.0);
                    tracing::warn!(
                        request_id = %request.request_id,
                        model = %model,
                        %error,
                        "attempt failed, advancing cascade"
                    );
                    guard.push_attempt(AttemptRecord {
                        model: model.clone(),
                        latency_ms: 0,
                        cost_usd: 0.0,
                        confidence: None,
                        estimator: None,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        if let Some(found) = best {
            return Ok(Self::low_confidence_response(&request, found, guard, started));
        }

        let trail = DecisionTrail {
            excluded: plan.excluded,
            tried: plan.ranked.into_iter().take(depth).collect(),
        };
        guard.finish(Outcome::NoEligibleModel, None);
        Err(RoutingError::NoEligibleModel { trail })
    }

    /// One timed call to one backend.
    async fn attempt(
        &self,
        model: &ModelId,
        request: &RouteRequest,
        slot_timeout: Duration,
    ) -> Result<InvokeResponse> {
        let adapter = self.adapters.get(model)?;
        if !adapter.is_available().await {
            return Err(RoutingError::ProviderError {
                model: model.clone(),
                message: "backend reports unavailable".to_owned(),
            });
        }
        let invoke = InvokeRequest::single_turn(model.clone(), request.payload.clone());

        match tokio::time::timeout(slot_timeout, adapter.invoke(&invoke)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(RoutingError::ProviderError {
                model: model.clone(),
                message: error.to_string(),
            }),
            Err(_) => Err(RoutingError::ProviderTimeout {
                model: model.clone(),
                after_ms: slot_timeout.as_millis() as u64,
            }),
        }
    }

    /// Estimated per-call cost: observed when the scorecard has samples,
    /// list price otherwise.
    fn estimated_cost(&self, model: &ModelId, request: &RouteRequest) -> f64 {
        let observed = self
            .scorecards
            .load()
            .card(model, request.task_type)
            .filter(|card| card.sample_count > 0)
            .map(|card| card.cost_observed);
        observed.unwrap_or_else(|| {
            self.models
                .get(model)
                .map_or(0.0, |descriptor| descriptor.cost_per_unit)
        })
    }

    fn low_confidence_response(
        request: &RouteRequest,
        found: BestSoFar,
        guard: DecisionGuard,
        started: Instant,
    ) -> RouteResponse {
        let total_cost = guard
            .decision
            .as_ref()
            .map_or(found.response.cost_usd, |decision| decision.total_cost_usd);
        guard.finish(Outcome::LowConfidenceExhausted, Some(found.model.clone()));
        RouteResponse {
            request_id: request.request_id,
            model: found.model,
            text: found.response.text,
            confidence: found.confidence,
            estimator: found.estimator,
            outcome: Outcome::LowConfidenceExhausted,
            cost_usd: total_cost,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}
