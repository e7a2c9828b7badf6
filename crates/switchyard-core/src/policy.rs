//! Tenant policy: the per-tenant constraints the routing engine honors.

use crate::descriptor::PrivacyTier;
use crate::types::ModelId;
use serde::{Deserialize, Serialize};

/// Per-tenant routing constraints.
///
/// Owned by configuration management; the engine reads it and never mutates
/// it. Violations surface immediately and are never silently downgraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPolicy {
    /// Privacy tiers this tenant's data may be sent to.
    pub allowed_privacy_tiers: Vec<PrivacyTier>,
    /// If present, only these models may be used.
    #[serde(default)]
    pub model_allowlist: Option<Vec<ModelId>>,
    /// Models that must never be used, applied after the allowlist.
    #[serde(default)]
    pub model_denylist: Vec<ModelId>,
    /// Spend ceiling in USD per budget period.
    pub budget_cap_per_period: f64,
    /// Budget period length in seconds.
    pub budget_period_secs: u64,
    /// End-to-end latency ceiling in milliseconds, split across cascade slots.
    pub latency_ceiling_ms: u64,
    /// Minimum acceptable `quality_z`; waived only when it would empty the
    /// candidate set.
    pub quality_floor_z: f64,
    /// Confidence threshold below which the gateway escalates to the next
    /// cascade candidate.
    pub escalate_below: f64,
    /// Maximum number of backends tried for one request.
    pub max_cascade_depth: usize,
    /// Override for the cost weight in the utility formula.
    #[serde(default)]
    pub cost_weight: Option<f64>,
    /// Override for the latency weight in the utility formula.
    #[serde(default)]
    pub latency_weight: Option<f64>,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            allowed_privacy_tiers: vec![
                PrivacyTier::LocalOnly,
                PrivacyTier::Restricted,
                PrivacyTier::Open,
            ],
            model_allowlist: None,
            model_denylist: Vec::new(),
            budget_cap_per_period: 10.0,
            budget_period_secs: 3600,
            latency_ceiling_ms: 30_000,
            quality_floor_z: -1.0,
            escalate_below: 0.7,
            max_cascade_depth: 3,
            cost_weight: None,
            latency_weight: None,
        }
    }
}

impl TenantPolicy {
    /// Whether the tenant allows sending data to the given privacy tier.
    #[must_use]
    pub fn allows_tier(&self, tier: PrivacyTier) -> bool {
        self.allowed_privacy_tiers.contains(&tier)
    }

    /// Whether the tenant allows using the given model at all.
    #[must_use]
    pub fn allows_model(&self, model: &ModelId) -> bool {
        if self.model_denylist.contains(model) {
            return false;
        }
        match &self.model_allowlist {
            Some(allowlist) => allowlist.contains(model),
            None => true,
        }
    }

    /// Restricts the allowed privacy tiers.
    #[must_use]
    pub fn with_allowed_tiers(mut self, tiers: Vec<PrivacyTier>) -> Self {
        self.allowed_privacy_tiers = tiers;
        self
    }

    /// Sets the quality floor.
    #[must_use]
    pub fn with_quality_floor(mut self, quality_floor_z: f64) -> Self {
        self.quality_floor_z = quality_floor_z;
        self
    }

    /// Sets the budget cap per period.
    #[must_use]
    pub fn with_budget_cap(mut self, budget_cap_per_period: f64) -> Self {
        self.budget_cap_per_period = budget_cap_per_period;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_every_tier() {
        let policy = TenantPolicy::default();
        assert!(policy.allows_tier(PrivacyTier::LocalOnly));
        assert!(policy.allows_tier(PrivacyTier::Restricted));
        assert!(policy.allows_tier(PrivacyTier::Open));
    }

    #[test]
    fn test_denylist_beats_allowlist() {
        let model = ModelId::new("gpt-4o");
        let policy = TenantPolicy {
            model_allowlist: Some(vec![model.clone()]),
            model_denylist: vec![model.clone()],
            ..TenantPolicy::default()
        };
        assert!(!policy.allows_model(&model));
    }

    #[test]
    fn test_allowlist_excludes_unlisted() {
        let policy = TenantPolicy {
            model_allowlist: Some(vec![ModelId::new("llama-local")]),
            ..TenantPolicy::default()
        };
        assert!(policy.allows_model(&ModelId::new("llama-local")));
        assert!(!policy.allows_model(&ModelId::new("gpt-4o")));
    }

    #[test]
    fn test_local_only_tenant() {
        let policy = TenantPolicy::default().with_allowed_tiers(vec![PrivacyTier::LocalOnly]);
        assert!(policy.allows_tier(PrivacyTier::LocalOnly));
        assert!(!policy.allows_tier(PrivacyTier::Open));
    }
}
