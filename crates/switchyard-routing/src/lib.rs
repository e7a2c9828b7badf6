//! Routing engine for the switchyard inference gateway.
//!
//! Houses the model registry, scorecard store, circuit breakers, budget
//! ledger, confidence estimators, the policy engine, the cascade gateway,
//! telemetry, and the recalibration job.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

/// Per-backend circuit breakers.
pub mod breaker;
/// Per-tenant budget tracking.
pub mod budget;
/// Confidence estimation for cascade escalation.
pub mod confidence;
/// Routing error types.
pub mod error;
/// The gateway entry point and cascade executor.
pub mod gateway;
/// Candidate selection and ranking.
pub mod policy;
/// Offline scorecard recalibration.
pub mod recalibrate;
/// Model and adapter registries.
pub mod registry;
/// Versioned scorecard snapshots and their store.
pub mod scorecard;
/// Decision records and the telemetry log.
pub mod telemetry;

pub use breaker::{Admission, BreakerStatus, CircuitBreakerManager};
pub use budget::{BudgetLedger, TokenBucket};
pub use confidence::{
    CompositeEstimator, ConfidenceEstimator, GroundingEstimator, SelfConsistencyEstimator,
    StaticPriorEstimator,
};
pub use error::{DecisionTrail, Result, RoutingError};
pub use gateway::{Gateway, RouteResponse};
pub use policy::{
    CandidatePlan, ExcludedCandidate, ExclusionReason, PolicyEngine, PolicyInputs, RequestMeta,
    UtilityWeights,
};
pub use recalibrate::{
    diff, CardDelta, FilePriorSource, PriorSource, PriorTable, RecalibrationJob, StaticPriorSource,
};
pub use registry::{AdapterRegistry, ModelRegistry};
pub use scorecard::{ScoreCard, ScorecardSnapshot, ScorecardStore, SnapshotFile};
pub use telemetry::{
    read_log, AttemptRecord, DecisionWithFeedback, Outcome, PolicyOverride, RoutingDecision,
    TelemetryEvent, TelemetrySink, UserFeedback,
};
