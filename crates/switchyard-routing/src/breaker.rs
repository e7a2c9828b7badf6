//! Per-backend circuit breakers isolating failing providers.
//!
//! Each backend owns an independent state machine guarded by its own mutex,
//! so concurrent requests to different backends never contend. Transition
//! logic takes explicit instants, keeping it deterministic under test; the
//! manager wrappers pass the current time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use switchyard_core::config::BreakerSettings;
use switchyard_core::{IgnoreLock as _, IgnoreRwLock as _, ModelId};

/// Liveness state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Serving traffic.
    Closed,
    /// Blocked; filtered out of candidate selection entirely.
    Open,
    /// Cooldown elapsed; exactly one probe allowed.
    HalfOpen,
}

/// Breaker tuning derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Rolling failure window.
    pub window: Duration,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Initial cooldown before a half-open probe.
    pub cooldown: Duration,
    /// Ceiling on the exponentially doubled cooldown.
    pub cooldown_cap: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from(BreakerSettings::default())
    }
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(settings: BreakerSettings) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs),
            failure_threshold: settings.failure_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
            cooldown_cap: Duration::from_secs(settings.cooldown_cap_secs),
        }
    }
}

/// Whether a dispatch against a backend may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; dispatch normally.
    Allowed,
    /// Breaker half-open; this caller holds the single probe slot.
    Probe,
    /// Breaker open or probe slot taken; skip this backend.
    Rejected,
}

/// State machine for one backend.
#[derive(Debug)]
pub struct BreakerSlot {
    /// Current state.
    status: BreakerStatus,
    /// Failures observed in the current window.
    failure_count: u32,
    /// Start of the current failure window.
    window_start: Instant,
    /// When the next half-open probe is permitted.
    next_probe_at: Option<Instant>,
    /// Cooldown applied on the most recent open, doubled on repeated trips.
    cooldown: Duration,
    /// Deadline by which an admitted probe must report back. A probe whose
    /// caller vanished (cancelled request) is considered abandoned past this
    /// point so half-open cannot wedge.
    probe_deadline: Option<Instant>,
}

impl BreakerSlot {
    /// Creates a closed slot.
    #[must_use]
    pub fn new(now: Instant, config: &BreakerConfig) -> Self {
        Self {
            status: BreakerStatus::Closed,
            failure_count: 0,
            window_start: now,
            next_probe_at: None,
            cooldown: config.cooldown,
            probe_deadline: None,
        }
    }

    /// Current status, advancing open → half-open if the cooldown elapsed.
    pub fn status(&mut self, now: Instant) -> BreakerStatus {
        if self.status == BreakerStatus::Open
            && let Some(next_probe_at) = self.next_probe_at
            && now >= next_probe_at
        {
            self.status = BreakerStatus::HalfOpen;
            self.probe_deadline = None;
        }
        self.status
    }

    /// Asks to dispatch against this backend.
    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.status(now) {
            BreakerStatus::Closed => Admission::Allowed,
            BreakerStatus::Open => Admission::Rejected,
            BreakerStatus::HalfOpen => {
                let probe_free = self
                    .probe_deadline
                    .is_none_or(|deadline| now >= deadline);
                if probe_free {
                    self.probe_deadline = Some(now + self.cooldown);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Records a successful dispatch.
    pub fn record_success(&mut self, now: Instant, config: &BreakerConfig) {
        if self.status == BreakerStatus::HalfOpen {
            tracing::info!("breaker probe succeeded, closing");
        }
        self.status = BreakerStatus::Closed;
        self.failure_count = 0;
        self.window_start = now;
        self.next_probe_at = None;
        self.probe_deadline = None;
        self.cooldown = config.cooldown;
    }

    /// Records a failed dispatch (provider error or timeout; low confidence
    /// is never reported here).
    pub fn record_failure(&mut self, now: Instant, config: &BreakerConfig) {
        match self.status(now) {
            BreakerStatus::Closed => {
                if now.duration_since(self.window_start) > config.window {
                    self.window_start = now;
                    self.failure_count = 0;
                }
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.trip(now);
                }
            }
            BreakerStatus::HalfOpen => {
                // Probe failed: reopen with a doubled, capped cooldown.
                self.cooldown = (self.cooldown * 2).min(config.cooldown_cap);
                self.trip(now);
            }
            BreakerStatus::Open => {}
        }
    }

    /// Moves to open and schedules the next probe.
    fn trip(&mut self, now: Instant) {
        self.status = BreakerStatus::Open;
        self.next_probe_at = Some(now + self.cooldown);
        self.probe_deadline = None;
        tracing::warn!(cooldown_ms = self.cooldown.as_millis() as u64, "breaker opened");
    }

    /// Failures observed in the current window.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

/// Manager holding one breaker slot per backend.
pub struct CircuitBreakerManager {
    /// Tuning shared by all slots.
    config: BreakerConfig,
    /// Slots keyed by model id. The outer lock is only written when a new
    /// backend is first seen; per-dispatch updates take only the slot mutex.
    slots: RwLock<HashMap<ModelId, Arc<Mutex<BreakerSlot>>>>,
}

impl CircuitBreakerManager {
    /// Creates a manager with the given tuning.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the slot for a backend, creating it on first sight.
    fn slot(&self, model: &ModelId) -> Arc<Mutex<BreakerSlot>> {
        {
            let slots = self.slots.read_ignore_poison();
            if let Some(slot) = slots.get(model) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write_ignore_poison();
        let slot = slots
            .entry(model.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerSlot::new(Instant::now(), &self.config))));
        Arc::clone(slot)
    }

    /// Asks to dispatch against a backend.
    pub fn admit(&self, model: &ModelId) -> Admission {
        let slot = self.slot(model);
        let mut guard = slot.lock_ignore_poison();
        guard.admit(Instant::now())
    }

    /// Records a successful dispatch.
    pub fn record_success(&self, model: &ModelId) {
        let slot = self.slot(model);
        let mut guard = slot.lock_ignore_poison();
        guard.record_success(Instant::now(), &self.config);
    }

    /// Records a failed dispatch.
    pub fn record_failure(&self, model: &ModelId) {
        let slot = self.slot(model);
        let mut guard = slot.lock_ignore_poison();
        guard.record_failure(Instant::now(), &self.config);
    }

    /// Backends currently open (still cooling down). An eventually-consistent
    /// snapshot: it may lag a concurrent dispatch by one request, which is
    /// acceptable for a safety net.
    #[must_use]
    pub fn blocked_models(&self) -> HashSet<ModelId> {
        let now = Instant::now();
        let slots = self.slots.read_ignore_poison();
        slots
            .iter()
            .filter(|(_, slot)| {
                let mut guard = slot.lock_ignore_poison();
                guard.status(now) == BreakerStatus::Open
            })
            .map(|(model, _)| model.clone())
            .collect()
    }

    /// Current status of one backend.
    pub fn status(&self, model: &ModelId) -> BreakerStatus {
        let slot = self.slot(model);
        let mut guard = slot.lock_ignore_poison();
        guard.status(Instant::now())
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
