//! Backend adapters for the switchyard gateway.
//!
//! Every backend, self-hosted or remote, is addressed through the
//! OpenAI-compatible chat-completions shape, so a vLLM or TGI deployment and
//! a hosted API register the same way.
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

/// Scriptable mock adapter for tests.
pub mod mock;
/// OpenAI-compatible HTTP adapter.
pub mod openai_compat;

pub use mock::{MockAdapter, ScriptedOutcome};
pub use openai_compat::OpenAiCompatAdapter;
