//! Core types and traits for the switchyard inference gateway.
//!
//! This crate provides the shared vocabulary of the gateway: request and
//! response shapes, backend descriptors, tenant policy, the backend adapter
//! trait, error handling, and configuration documents.
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

/// Configuration documents (registry, tenant policies, gateway settings).
pub mod config;
/// Backend descriptor types.
pub mod descriptor;
/// Error types and result definitions.
pub mod error;
/// Tenant policy configuration.
pub mod policy;
/// Synchronization utilities.
pub mod sync;
/// Trait definitions for backend adapters.
pub mod traits;
/// Core data types for requests, responses, and identifiers.
pub mod types;

pub use config::{
    BreakerSettings, ConsistencySettings, GatewaySettings, RegistryDocument, TenantPolicyDocument,
};
pub use descriptor::{ModelDescriptor, PrivacyTier, ProviderKind};
pub use error::{Error, Result};
pub use policy::TenantPolicy;
pub use sync::{IgnoreLock, IgnoreRwLock};
pub use traits::BackendAdapter;
pub use types::{
    ChatMessage, InvokeRequest, InvokeResponse, ModelId, RequestId, RouteRequest, TaskType,
    TenantId, TokenUsage,
};
