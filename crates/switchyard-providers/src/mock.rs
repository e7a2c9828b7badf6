//! Mock adapter for testing routing behavior.
//!
//! Supports canned responses for prompt patterns plus an outcome script that
//! forces failures or stalls, which the circuit breaker and cascade tests
//! rely on. No network calls are made.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::{
    BackendAdapter, Error, IgnoreLock as _, InvokeRequest, InvokeResponse, Result, TokenUsage,
};

/// Outcome forced for one scripted call.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return this text successfully.
    Succeed(String),
    /// Fail with a backend error carrying this message.
    Fail(String),
    /// Stall for the given duration before answering, to trip caller
    /// timeouts.
    Stall(Duration),
}

/// Shared interior of a mock adapter, cloneable across test handles.
#[derive(Default)]
struct MockState {
    /// Pattern-keyed canned responses.
    responses: HashMap<String, String>,
    /// Response used when no pattern matches.
    default_response: Option<String>,
    /// Outcomes consumed front-to-back before pattern matching applies.
    script: VecDeque<ScriptedOutcome>,
    /// When set, `is_available` reports false.
    offline: bool,
    /// Prompts of every call made.
    call_history: Vec<String>,
}

/// Mock backend adapter with canned responses and outcome scripting.
#[derive(Clone)]
pub struct MockAdapter {
    /// Name reported for this adapter.
    name: String,
    /// Cost attached to every successful call.
    cost_usd: f64,
    /// Latency reported for every successful call.
    latency_ms: u64,
    /// Shared mutable state.
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Creates a mock adapter with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cost_usd: 0.0,
            latency_ms: 5,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Adds a pattern-keyed canned response.
    #[must_use]
    pub fn with_response(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock_ignore_poison();
            state.responses.insert(pattern.into(), response.into());
        }
        self
    }

    /// Sets the response used when no pattern matches.
    #[must_use]
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock_ignore_poison();
            state.default_response = Some(response.into());
        }
        self
    }

    /// Sets the cost reported for every successful call.
    #[must_use]
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    /// Sets the latency reported for every successful call.
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Appends an outcome to the script. Scripted outcomes are consumed in
    /// order before pattern matching applies.
    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        let mut state = self.state.lock_ignore_poison();
        state.script.push_back(outcome);
    }

    /// Appends `count` copies of a failure outcome.
    pub fn push_failures(&self, count: usize, message: &str) {
        for _ in 0..count {
            self.push_outcome(ScriptedOutcome::Fail(message.to_owned()));
        }
    }

    /// Marks the backend available or unavailable for health checks.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock_ignore_poison();
        state.offline = !available;
    }

    /// Returns the prompts of every call made.
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        let state = self.state.lock_ignore_poison();
        state.call_history.clone()
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        let state = self.state.lock_ignore_poison();
        state.call_history.len()
    }

    /// Clears the call history.
    pub fn clear_history(&self) {
        let mut state = self.state.lock_ignore_poison();
        state.call_history.clear();
    }

    /// Finds a canned response for the given prompt.
    fn find_response(&self, prompt: &str) -> String {
        let state = self.state.lock_ignore_poison();

        if let Some(response) = state.responses.get(prompt) {
            return response.clone();
        }

        for (pattern, response) in &state.responses {
            if prompt.contains(pattern) {
                return response.clone();
            }
        }

        state
            .default_response
            .clone()
            .unwrap_or_else(|| format!("mock response for: {prompt}"))
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let state = self.state.lock_ignore_poison();
        !state.offline
    }

    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        let prompt = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();

        let scripted = {
            let mut state = self.state.lock_ignore_poison();
            state.call_history.push(prompt.clone());
            state.script.pop_front()
        };

        let text = match scripted {
            Some(ScriptedOutcome::Fail(message)) => {
                return Err(Error::Backend(message));
            }
            Some(ScriptedOutcome::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                self.find_response(&prompt)
            }
            Some(ScriptedOutcome::Succeed(text)) => text,
            None => self.find_response(&prompt),
        };

        Ok(InvokeResponse {
            text,
            usage: TokenUsage {
                input: prompt.len() as u64 / 4,
                output: 64,
            },
            cost_usd: self.cost_usd,
            latency_ms: self.latency_ms,
        })
    }
}
