use crate::policy::ExcludedCandidate;
use serde_json::Error as JsonError;
use std::io::Error as IoError;
use std::result::Result as StdResult;
use switchyard_core::{Error as CoreError, ModelId, TenantId};
use thiserror::Error as ThisError;

/// Result type for routing operations.
pub type Result<T> = StdResult<T, RoutingError>;

/// Why a request could not be served, with enough context to diagnose it.
#[derive(Debug, ThisError)]
pub enum RoutingError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] JsonError),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tenant's budget for the current period is exhausted. Terminal;
    /// never retried against another backend.
    #[error("Budget exceeded for tenant {tenant}")]
    BudgetExceeded {
        /// Tenant whose budget ran out.
        tenant: TenantId,
    },

    /// A backend call exceeded its share of the latency ceiling. Local to one
    /// candidate; the cascade advances.
    #[error("Backend {model} timed out after {after_ms}ms")]
    ProviderTimeout {
        /// Backend that timed out.
        model: ModelId,
        /// Deadline that was exceeded, in milliseconds.
        after_ms: u64,
    },

    /// A backend rejected or failed the call. Local to one candidate; the
    /// cascade advances.
    #[error("Backend {model} failed: {message}")]
    ProviderError {
        /// Backend that failed.
        model: ModelId,
        /// Failure detail.
        message: String,
    },

    /// No backend could serve the request. Terminal; carries the full
    /// decision trail so the caller can see why every candidate was excluded
    /// or failed.
    #[error("No eligible model ({})", trail.summary())]
    NoEligibleModel {
        /// The full decision trail.
        trail: DecisionTrail,
    },

    /// Recalibration failed.
    #[error("Recalibration failed: {0}")]
    Recalibration(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl RoutingError {
    /// Whether the cascade may recover from this error by advancing to the
    /// next candidate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTimeout { .. } | Self::ProviderError { .. }
        )
    }
}

/// The considered-and-tried record attached to terminal routing failures.
#[derive(Debug, Clone, Default)]
pub struct DecisionTrail {
    /// Candidates excluded before dispatch, with their reason codes.
    pub excluded: Vec<ExcludedCandidate>,
    /// Backends actually invoked, in order.
    pub tried: Vec<ModelId>,
}

impl DecisionTrail {
    /// One-line summary for error display.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} excluded, {} tried",
            self.excluded.len(),
            self.tried.len()
        )
    }
}
