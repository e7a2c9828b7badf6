//! The routing policy engine: candidate selection and cascade ordering.
//!
//! `select_candidates` is a pure function over explicit snapshots (registry,
//! scorecards, blocked-backend set, tenant policy). No hidden state, so a
//! frozen set of inputs always yields the same plan.

use crate::registry::ModelRegistry;
use crate::scorecard::{ScoreCard, ScorecardSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use switchyard_core::{ModelDescriptor, ModelId, PrivacyTier, TaskType, TenantPolicy};

/// Why a candidate was excluded before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Privacy tier outside the tenant's allowed set.
    PrivacyTier,
    /// Explicitly denylisted by the tenant.
    Denylisted,
    /// Tenant runs an allowlist and the model is not on it.
    NotOnAllowlist,
    /// Backend cannot serve the requested task type.
    MissingCapability,
    /// Circuit breaker is open for this backend.
    BreakerOpen,
    /// Estimated cost exceeds the request's cost cap.
    OverCostCap,
    /// Quality estimate below the tenant's floor.
    BelowQualityFloor,
}

/// One excluded candidate and its reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedCandidate {
    /// The excluded model.
    pub model: ModelId,
    /// Why it was excluded.
    pub reason: ExclusionReason,
}

/// Ordered cascade plan produced by the policy engine.
///
/// Advisory: the gateway retains authority to advance through the ranking or
/// stop early.
#[derive(Debug, Clone, Default)]
pub struct CandidatePlan {
    /// Candidates in dispatch order; the first entry is the first try.
    pub ranked: Vec<ModelId>,
    /// Candidates excluded, with reason codes, for the decision record.
    pub excluded: Vec<ExcludedCandidate>,
    /// Set when the quality floor was waived to avoid an empty plan.
    pub quality_floor_waived: bool,
}

/// Weights of the utility formula `quality_z − λ·cost − μ·latency`.
#[derive(Debug, Clone, Copy)]
pub struct UtilityWeights {
    /// Cost weight λ.
    pub cost: f64,
    /// Latency weight μ.
    pub latency: f64,
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            cost: 0.5,
            latency: 0.3,
        }
    }
}

/// The inputs one selection reads: explicit snapshots, dependency-injected so
/// tests can freeze them.
pub struct PolicyInputs<'snapshot> {
    /// Registry snapshot.
    pub registry: &'snapshot ModelRegistry,
    /// Active scorecard snapshot.
    pub scorecards: &'snapshot ScorecardSnapshot,
    /// Backends whose breaker is currently open.
    pub blocked: &'snapshot HashSet<ModelId>,
}

/// What the engine needs to know about the request itself.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta {
    /// Task type requested.
    pub task_type: TaskType,
    /// Optional per-request privacy tightening.
    pub privacy_requirement: Option<PrivacyTier>,
    /// Optional per-request cost cap in USD.
    pub max_cost: Option<f64>,
}

/// A surviving candidate with the numbers ranking needs.
struct ScoredCandidate {
    /// Model id.
    model: ModelId,
    /// Quality estimate.
    quality_z: f64,
    /// Estimated per-call cost in USD.
    cost: f64,
    /// 95th percentile latency.
    latency_p95_ms: u64,
    /// Median latency, used for tie-breaks.
    latency_p50_ms: u64,
    /// Utility, filled in by the ranking step.
    utility: f64,
}

/// Deterministic candidate selection over frozen snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine {
    /// Deployment-default utility weights; tenant overrides win.
    pub weights: UtilityWeights,
}

impl PolicyEngine {
    /// Creates an engine with the given default weights.
    #[must_use]
    pub fn new(weights: UtilityWeights) -> Self {
        Self { weights }
    }

    /// Selects and orders candidates for one request.
    ///
    /// Hard filters drop ineligible models with reason codes; the quality
    /// floor is waived rather than returning an empty plan when at least one
    /// capable model survived the hard filters; survivors are ranked by
    /// utility, with a cheap near-equal candidate promoted to the probe slot.
    #[must_use]
    pub fn select_candidates(
        &self,
        meta: &RequestMeta,
        policy: &TenantPolicy,
        inputs: &PolicyInputs<'_>,
    ) -> CandidatePlan {
        let mut plan = CandidatePlan::default();
        let mut survivors: Vec<ScoredCandidate> = Vec::new();

        // Step 1: hard filters. Non-negotiable; exclusions carry reasons.
        for id in inputs.registry.ids() {
            let Some(descriptor) = inputs.registry.get(&id) else {
                continue;
            };
            if let Some(reason) = Self::hard_filter(descriptor, meta, policy, inputs) {
                plan.excluded.push(ExcludedCandidate { model: id, reason });
                continue;
            }
            survivors.push(Self::score(descriptor, meta, inputs.scorecards));
        }

        // Step 2: quality floor, waived if it would empty the plan.
        let (mut survivors, waived) = Self::apply_quality_floor(survivors, policy, &mut plan);
        plan.quality_floor_waived = waived;
        if survivors.is_empty() {
            return plan;
        }

        // Step 3: utility ranking over request-normalized cost and latency.
        let weights = UtilityWeights {
            cost: policy.cost_weight.unwrap_or(self.weights.cost),
            latency: policy.latency_weight.unwrap_or(self.weights.latency),
        };
        Self::rank(&mut survivors, weights);

        // Step 4: cheap-probe promotion.
        Self::promote_cheap_probe(&mut survivors);

        plan.ranked = survivors.into_iter().map(|entry| entry.model).collect();
        plan
    }

    /// Applies the non-negotiable rule layer; returns the exclusion reason if
    /// the model is dropped.
    fn hard_filter(
        descriptor: &ModelDescriptor,
        meta: &RequestMeta,
        policy: &TenantPolicy,
        inputs: &PolicyInputs<'_>,
    ) -> Option<ExclusionReason> {
        if !descriptor.supports(meta.task_type) {
            return Some(ExclusionReason::MissingCapability);
        }
        if !policy.allows_model(&descriptor.id) {
            let reason = if policy.model_denylist.contains(&descriptor.id) {
                ExclusionReason::Denylisted
            } else {
                ExclusionReason::NotOnAllowlist
            };
            return Some(reason);
        }
        if !policy.allows_tier(descriptor.privacy_tier) {
            return Some(ExclusionReason::PrivacyTier);
        }
        if let Some(required) = meta.privacy_requirement
            && descriptor.privacy_tier > required
        {
            return Some(ExclusionReason::PrivacyTier);
        }
        if inputs.blocked.contains(&descriptor.id) {
            return Some(ExclusionReason::BreakerOpen);
        }
        if let Some(max_cost) = meta.max_cost {
            let estimated = Self::estimated_cost(descriptor, meta, inputs.scorecards);
            if estimated > max_cost {
                return Some(ExclusionReason::OverCostCap);
            }
        }
        None
    }

    /// Builds the candidate's numbers from its active card, falling back to
    /// a neutral card seeded with the descriptor's list price for backends
    /// the recalibration job has not seen yet.
    fn score(
        descriptor: &ModelDescriptor,
        meta: &RequestMeta,
        scorecards: &ScorecardSnapshot,
    ) -> ScoredCandidate {
        let card = scorecards
            .card(&descriptor.id, meta.task_type)
            .copied()
            .unwrap_or_else(|| ScoreCard {
                cost_observed: descriptor.cost_per_unit,
                ..ScoreCard::neutral()
            });
        ScoredCandidate {
            model: descriptor.id.clone(),
            quality_z: card.quality_z,
            cost: if card.sample_count > 0 {
                card.cost_observed
            } else {
                descriptor.cost_per_unit.max(card.cost_observed)
            },
            latency_p95_ms: card.latency_p95_ms,
            latency_p50_ms: card.latency_p50_ms,
            utility: 0.0,
        }
    }

    /// Estimated per-call cost used for the request cost cap.
    fn estimated_cost(
        descriptor: &ModelDescriptor,
        meta: &RequestMeta,
        scorecards: &ScorecardSnapshot,
    ) -> f64 {
        scorecards
            .card(&descriptor.id, meta.task_type)
            .filter(|card| card.sample_count > 0)
            .map_or(descriptor.cost_per_unit, |card| card.cost_observed)
    }

    /// Drops candidates below the floor, unless that would empty the set: in
    /// that case the single highest-quality candidate is kept and the waiver
    /// flagged. A request is never failed while a capable model exists.
    fn apply_quality_floor(
        survivors: Vec<ScoredCandidate>,
        policy: &TenantPolicy,
        plan: &mut CandidatePlan,
    ) -> (Vec<ScoredCandidate>, bool) {
        if survivors.is_empty() {
            return (survivors, false);
        }
        let (passing, failing): (Vec<_>, Vec<_>) = survivors
            .into_iter()
            .partition(|entry| entry.quality_z >= policy.quality_floor_z);

        if !passing.is_empty() {
            for entry in &failing {
                plan.excluded.push(ExcludedCandidate {
                    model: entry.model.clone(),
                    reason: ExclusionReason::BelowQualityFloor,
                });
            }
            return (passing, false);
        }

        // Floor would empty the set: keep the single best, flag the waiver.
        let mut failing = failing;
        failing.sort_by(|left, right| {
            right
                .quality_z
                .total_cmp(&left.quality_z)
                .then_with(|| left.model.cmp(&right.model))
        });
        let best = failing.remove(0);
        for entry in &failing {
            plan.excluded.push(ExcludedCandidate {
                model: entry.model.clone(),
                reason: ExclusionReason::BelowQualityFloor,
            });
        }
        tracing::info!(model = %best.model, "quality floor waived to keep plan non-empty");
        (vec![best], true)
    }

    /// Computes utilities over min-max normalized cost and latency and sorts
    /// descending; ties broken by median latency, then lexicographic id, so
    /// the ordering is deterministic.
    fn rank(survivors: &mut [ScoredCandidate], weights: UtilityWeights) {
        let (cost_min, cost_max) = min_max(survivors.iter().map(|entry| entry.cost));
        let (lat_min, lat_max) = min_max(survivors.iter().map(|entry| entry.latency_p95_ms as f64));

        for entry in survivors.iter_mut() {
            let norm_cost = normalize(entry.cost, cost_min, cost_max);
            let norm_latency = normalize(entry.latency_p95_ms as f64, lat_min, lat_max);
            entry.utility =
                entry.quality_z - weights.cost * norm_cost - weights.latency * norm_latency;
        }

        survivors.sort_by(|left, right| {
            right
                .utility
                .total_cmp(&left.utility)
                .then_with(|| left.latency_p50_ms.cmp(&right.latency_p50_ms))
                .then_with(|| left.model.cmp(&right.model))
        });
    }

    /// Try-cheap-first: if some candidate's cost is below the 25th percentile
    /// of the set and its quality is within one standard deviation of the top
    /// candidate's, move it to the probe slot. The displaced top candidate
    /// becomes the escalation target.
    fn promote_cheap_probe(survivors: &mut Vec<ScoredCandidate>) {
        if survivors.len() < 2 {
            return;
        }
        let costs: Vec<f64> = survivors.iter().map(|entry| entry.cost).collect();
        let cost_p25 = percentile(&costs, 0.25);
        let quality_stddev = stddev(survivors.iter().map(|entry| entry.quality_z));
        let top_quality = survivors[0].quality_z;

        let probe_index = survivors.iter().enumerate().skip(1).find_map(|(index, entry)| {
            let cheap = entry.cost < cost_p25;
            let near_top = entry.quality_z >= top_quality - quality_stddev.max(f64::EPSILON);
            (cheap && near_top).then_some(index)
        });

        if let Some(index) = probe_index {
            let probe = survivors.remove(index);
            tracing::debug!(model = %probe.model, "cheap probe promoted to first try");
            survivors.insert(0, probe);
        }
    }
}

/// Minimum and maximum of an iterator, or zeros when empty.
fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
        (min.min(value), max.max(value))
    })
}

/// Min-max normalization to [0, 1]; a degenerate range maps to zero so the
/// formula stays scale-invariant per request.
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.0
    }
}

/// Linear-interpolated percentile of an unsorted sample.
fn percentile(values: &[f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = fraction * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Population standard deviation.
fn stddev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|value| (value - mean).powi(2)).sum::<f64>() / count as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorecard::ScoreCard;
    use switchyard_core::ProviderKind;

    fn descriptor(id: &str, tier: PrivacyTier, cost: f64) -> ModelDescriptor {
        let provider = if tier == PrivacyTier::LocalOnly {
            ProviderKind::SelfHosted
        } else {
            ProviderKind::Remote
        };
        ModelDescriptor::new(id, provider, tier)
            .with_capabilities(vec![TaskType::Chat])
            .with_cost_per_unit(cost)
    }

    fn card(quality_z: f64, cost: f64, p50: u64, p95: u64) -> ScoreCard {
        ScoreCard {
            quality_z,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            cost_observed: cost,
            sample_count: 100,
            prior_weight: 0.2,
        }
    }

    fn meta() -> RequestMeta {
        RequestMeta {
            task_type: TaskType::Chat,
            privacy_requirement: None,
            max_cost: None,
        }
    }

    /// Fixture with two contrasting backends: A cheap and mid-quality,
    /// B expensive and strong.
    fn two_model_fixture() -> (ModelRegistry, ScorecardSnapshot) {
        let registry = ModelRegistry::new()
            .with_model(descriptor("model-a", PrivacyTier::LocalOnly, 0.001))
            .with_model(descriptor("model-b", PrivacyTier::Open, 0.02));

        let mut snapshot = ScorecardSnapshot::empty();
        snapshot.version = 1;
        snapshot.insert(
            ModelId::new("model-a"),
            TaskType::Chat,
            card(0.2, 0.001, 120, 200),
        );
        snapshot.insert(
            ModelId::new("model-b"),
            TaskType::Chat,
            card(0.9, 0.02, 500, 800),
        );
        (registry, snapshot)
    }

    #[test]
    fn test_cheap_probe_scenario_orders_a_first() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };
        let policy = TenantPolicy::default().with_quality_floor(0.0);

        let plan = PolicyEngine::default().select_candidates(&meta(), &policy, &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("model-a"), ModelId::new("model-b")]);
        assert!(!plan.quality_floor_waived);
    }

    #[test]
    fn test_privacy_filter_is_absolute() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };
        // Tenant allows local-only; B is remote/open, so it never appears
        // regardless of utility.
        let policy = TenantPolicy::default().with_allowed_tiers(vec![PrivacyTier::LocalOnly]);

        let plan = PolicyEngine::default().select_candidates(&meta(), &policy, &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("model-a")]);
        assert!(plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-b"),
            reason: ExclusionReason::PrivacyTier,
        }));
    }

    #[test]
    fn test_open_breaker_excluded() {
        let (registry, snapshot) = two_model_fixture();
        let blocked: HashSet<ModelId> = [ModelId::new("model-a")].into_iter().collect();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };

        let plan =
            PolicyEngine::default().select_candidates(&meta(), &TenantPolicy::default(), &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("model-b")]);
        assert!(plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-a"),
            reason: ExclusionReason::BreakerOpen,
        }));
    }

    #[test]
    fn test_denylist_and_allowlist_enforced() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };

        let denying = TenantPolicy {
            model_denylist: vec![ModelId::new("model-b")],
            ..TenantPolicy::default()
        };
        let deny_plan = PolicyEngine::default().select_candidates(&meta(), &denying, &inputs);
        assert_eq!(deny_plan.ranked, vec![ModelId::new("model-a")]);
        assert!(deny_plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-b"),
            reason: ExclusionReason::Denylisted,
        }));

        let allowing = TenantPolicy {
            model_allowlist: Some(vec![ModelId::new("model-b")]),
            ..TenantPolicy::default()
        };
        let allow_plan = PolicyEngine::default().select_candidates(&meta(), &allowing, &inputs);
        assert_eq!(allow_plan.ranked, vec![ModelId::new("model-b")]);
        assert!(allow_plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-a"),
            reason: ExclusionReason::NotOnAllowlist,
        }));
    }

    #[test]
    fn test_quality_floor_waived_rather_than_empty() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };
        // Floor above every candidate: keep the single best and flag.
        let policy = TenantPolicy::default().with_quality_floor(5.0);

        let plan = PolicyEngine::default().select_candidates(&meta(), &policy, &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("model-b")]);
        assert!(plan.quality_floor_waived);
        assert!(plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-a"),
            reason: ExclusionReason::BelowQualityFloor,
        }));
    }

    #[test]
    fn test_quality_floor_drops_when_someone_passes() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };
        let policy = TenantPolicy::default().with_quality_floor(0.5);

        let plan = PolicyEngine::default().select_candidates(&meta(), &policy, &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("model-b")]);
        assert!(!plan.quality_floor_waived);
    }

    #[test]
    fn test_missing_capability_excluded() {
        let registry = ModelRegistry::new()
            .with_model(
                ModelDescriptor::new("embedder", ProviderKind::SelfHosted, PrivacyTier::LocalOnly)
                    .with_capabilities(vec![TaskType::Embed]),
            )
            .with_model(descriptor("chatty", PrivacyTier::Open, 0.01));
        let snapshot = ScorecardSnapshot::empty();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };

        let plan =
            PolicyEngine::default().select_candidates(&meta(), &TenantPolicy::default(), &inputs);

        assert_eq!(plan.ranked, vec![ModelId::new("chatty")]);
        assert!(plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("embedder"),
            reason: ExclusionReason::MissingCapability,
        }));
    }

    #[test]
    fn test_request_cost_cap() {
        let (registry, snapshot) = two_model_fixture();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };
        let request_meta = RequestMeta {
            max_cost: Some(0.005),
            ..meta()
        };

        let plan = PolicyEngine::default().select_candidates(
            &request_meta,
            &TenantPolicy::default(),
            &inputs,
        );

        assert_eq!(plan.ranked, vec![ModelId::new("model-a")]);
        assert!(plan.excluded.contains(&ExcludedCandidate {
            model: ModelId::new("model-b"),
            reason: ExclusionReason::OverCostCap,
        }));
    }

    #[test]
    fn test_deterministic_tie_break() {
        let registry = ModelRegistry::new()
            .with_model(descriptor("twin-b", PrivacyTier::Open, 0.01))
            .with_model(descriptor("twin-a", PrivacyTier::Open, 0.01));
        let mut snapshot = ScorecardSnapshot::empty();
        for id in ["twin-a", "twin-b"] {
            snapshot.insert(ModelId::new(id), TaskType::Chat, card(0.5, 0.01, 300, 600));
        }
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };

        let plan =
            PolicyEngine::default().select_candidates(&meta(), &TenantPolicy::default(), &inputs);

        // Identical numbers: lexicographic id decides.
        assert_eq!(plan.ranked, vec![ModelId::new("twin-a"), ModelId::new("twin-b")]);
    }

    #[test]
    fn test_unknown_model_gets_neutral_card() {
        let registry =
            ModelRegistry::new().with_model(descriptor("newcomer", PrivacyTier::Open, 0.003));
        let snapshot = ScorecardSnapshot::empty();
        let blocked = HashSet::new();
        let inputs = PolicyInputs {
            registry: &registry,
            scorecards: &snapshot,
            blocked: &blocked,
        };

        let plan =
            PolicyEngine::default().select_candidates(&meta(), &TenantPolicy::default(), &inputs);
        assert_eq!(plan.ranked, vec![ModelId::new("newcomer")]);
    }

    #[test]
    fn test_percentile_and_stddev_helpers() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.25) - 1.75).abs() < 1e-9);
        assert!((percentile(&values, 1.0) - 4.0).abs() < 1e-9);

        let spread = stddev([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter());
        assert!((spread - 2.0).abs() < 1e-9);
    }
}
