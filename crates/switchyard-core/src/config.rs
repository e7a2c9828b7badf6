//! Versioned configuration documents consumed by the gateway.
//!
//! The registry and tenant policy documents are owned by configuration
//! management; the gateway only requires that updates are atomic and
//! versioned, which file replacement plus the `version` field provides.

use crate::descriptor::ModelDescriptor;
use crate::error::{Error, Result};
use crate::policy::TenantPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Versioned catalogue of backend descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Document version, bumped on every edit.
    pub version: u64,
    /// All registered backends.
    pub models: Vec<ModelDescriptor>,
}

impl RegistryDocument {
    /// Loads a registry document from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        let document: Self = toml::from_str(&content)?;
        Ok(document)
    }

    /// Saves the document as TOML.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|error| Error::Config(format!("failed to serialize registry: {error}")))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Versioned map of tenant policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantPolicyDocument {
    /// Document version, bumped on every edit.
    pub version: u64,
    /// Policy applied to tenants with no explicit entry.
    #[serde(default)]
    pub default_policy: TenantPolicy,
    /// Per-tenant overrides keyed by tenant id.
    #[serde(default)]
    pub tenants: HashMap<String, TenantPolicy>,
}

impl TenantPolicyDocument {
    /// Loads a tenant policy document from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        let document: Self = toml::from_str(&content)?;
        Ok(document)
    }

    /// Resolves the policy for a tenant, falling back to the default.
    #[must_use]
    pub fn policy_for(&self, tenant_id: &str) -> &TenantPolicy {
        self.tenants.get(tenant_id).unwrap_or(&self.default_policy)
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Rolling failure window in seconds.
    pub window_secs: u64,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Initial cooldown before a half-open probe, in seconds.
    pub cooldown_secs: u64,
    /// Ceiling on the exponentially doubled cooldown, in seconds.
    pub cooldown_cap_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            failure_threshold: 5,
            cooldown_secs: 30,
            cooldown_cap_secs: 600,
        }
    }
}

/// Self-consistency confidence sampling tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencySettings {
    /// Whether cheap-sample agreement scoring is enabled at all.
    pub enabled: bool,
    /// Number of cheap samples drawn per scored response (at least 2).
    pub samples: usize,
    /// Model used for the cheap samples.
    pub sampler_model: Option<String>,
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            samples: 2,
            sampler_model: None,
        }
    }
}

/// Deployment-wide gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Cost weight λ in the utility formula.
    pub cost_weight: f64,
    /// Latency weight μ in the utility formula.
    pub latency_weight: f64,
    /// Circuit breaker tuning.
    #[serde(default)]
    pub breaker: BreakerSettings,
    /// Self-consistency sampling tuning.
    #[serde(default)]
    pub consistency: ConsistencySettings,
    /// Path of the JSONL telemetry log.
    pub telemetry_path: String,
    /// Pseudo-sample weight of the external prior in recalibration.
    pub prior_pseudo_samples: f64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cost_weight: 0.5,
            latency_weight: 0.3,
            breaker: BreakerSettings::default(),
            consistency: ConsistencySettings::default(),
            telemetry_path: "telemetry.jsonl".to_owned(),
            prior_pseudo_samples: 50.0,
        }
    }
}

impl GatewaySettings {
    /// Loads gateway settings from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PrivacyTier, ProviderKind};
    use crate::types::TaskType;

    #[test]
    fn test_registry_document_round_trip() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("registry.toml");

        let document = RegistryDocument {
            version: 3,
            models: vec![
                ModelDescriptor::new(
                    "llama-local",
                    ProviderKind::SelfHosted,
                    PrivacyTier::LocalOnly,
                )
                .with_capabilities(vec![TaskType::Chat]),
            ],
        };
        document.save(&path)?;

        let loaded = RegistryDocument::load(&path)?;
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].id.as_str(), "llama-local");
        Ok(())
    }

    #[test]
    fn test_missing_registry_is_file_not_found() {
        let result = RegistryDocument::load(Path::new("/nonexistent/registry.toml"));
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_policy_document_fallback() {
        let mut tenants = HashMap::new();
        tenants.insert(
            "acme".to_owned(),
            TenantPolicy::default().with_quality_floor(0.5),
        );
        let document = TenantPolicyDocument {
            version: 1,
            default_policy: TenantPolicy::default(),
            tenants,
        };

        assert!((document.policy_for("acme").quality_floor_z - 0.5).abs() < f64::EPSILON);
        assert!((document.policy_for("unknown").quality_floor_z + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gateway_settings_defaults() {
        let settings = GatewaySettings::default();
        assert!((settings.cost_weight - 0.5).abs() < f64::EPSILON);
        assert!((settings.latency_weight - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.breaker.failure_threshold, 5);
        assert_eq!(settings.breaker.cooldown_cap_secs, 600);
    }
}
