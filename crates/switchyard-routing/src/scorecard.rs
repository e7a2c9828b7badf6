//! Scorecards: versioned statistical belief about (model, task) pairs.
//!
//! Snapshots are immutable and swapped atomically. The recalibration job is
//! the only writer; the policy engine only ever reads a snapshot it obtained
//! at the start of a request, so a concurrent publication is never observed
//! partially.

use crate::{Result, RoutingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use switchyard_core::{IgnoreLock as _, IgnoreRwLock as _, ModelId, TaskType};

/// Statistical belief about one (model, task type) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreCard {
    /// Standardized quality estimate, blending the external prior with
    /// internal accept/reject evidence.
    pub quality_z: f64,
    /// Median observed latency in milliseconds.
    pub latency_p50_ms: u64,
    /// 95th percentile observed latency in milliseconds.
    pub latency_p95_ms: u64,
    /// Mean observed cost per request in USD.
    pub cost_observed: f64,
    /// Number of internal feedback samples behind `quality_z`.
    pub sample_count: u64,
    /// Residual weight of the external prior, decaying toward zero as
    /// internal samples accumulate.
    pub prior_weight: f64,
}

impl ScoreCard {
    /// A neutral card for backends with no prior and no telemetry yet.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            quality_z: 0.0,
            latency_p50_ms: 500,
            latency_p95_ms: 1500,
            cost_observed: 0.0,
            sample_count: 0,
            prior_weight: 1.0,
        }
    }

    /// A card seeded purely from an external prior.
    #[must_use]
    pub fn from_prior(quality_z: f64) -> Self {
        Self {
            quality_z,
            ..Self::neutral()
        }
    }
}

/// One immutable scorecard version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScorecardSnapshot {
    /// Monotonic version id.
    pub version: u64,
    /// When this version was computed.
    pub computed_at: Option<DateTime<Utc>>,
    /// Set when the snapshot was built without reachable external priors.
    #[serde(default)]
    pub degraded_prior: bool,
    /// Cards keyed by model, then task type.
    pub cards: HashMap<ModelId, HashMap<TaskType, ScoreCard>>,
}

impl ScorecardSnapshot {
    /// Creates an empty version-zero snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up the active card for a (model, task) pair.
    #[must_use]
    pub fn card(&self, model: &ModelId, task_type: TaskType) -> Option<&ScoreCard> {
        self.cards.get(model).and_then(|tasks| tasks.get(&task_type))
    }

    /// Inserts a card, replacing any existing one for the pair.
    pub fn insert(&mut self, model: ModelId, task_type: TaskType, card: ScoreCard) {
        self.cards.entry(model).or_default().insert(task_type, card);
    }

    /// Builder form of [`Self::insert`] for tests and seeding.
    #[must_use]
    pub fn with_card(mut self, model: ModelId, task_type: TaskType, card: ScoreCard) -> Self {
        self.insert(model, task_type, card);
        self
    }

    /// Number of cards across all models.
    #[must_use]
    pub fn card_count(&self) -> usize {
        self.cards.values().map(HashMap::len).sum()
    }
}

/// Store holding the active snapshot and its history.
///
/// Readers clone an `Arc` under a short read lock; the publisher swaps the
/// pointer under a write lock. A reader that loaded the old snapshot simply
/// finishes its request against it.
pub struct ScorecardStore {
    /// The active snapshot.
    active: RwLock<Arc<ScorecardSnapshot>>,
    /// Retired snapshots, oldest first. Never mutated, kept for audit,
    /// rollback, and the CLI diff.
    history: Mutex<Vec<Arc<ScorecardSnapshot>>>,
}

impl ScorecardStore {
    /// Creates a store with the given initial snapshot.
    #[must_use]
    pub fn new(initial: ScorecardSnapshot) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Returns the active snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<ScorecardSnapshot> {
        Arc::clone(&self.active.read_ignore_poison())
    }

    /// Publishes a new snapshot, retiring the active one into history.
    ///
    /// # Errors
    /// Returns an error if the version does not advance monotonically.
    pub fn publish(&self, snapshot: ScorecardSnapshot) -> Result<()> {
        let fresh = Arc::new(snapshot);
        let mut active = self.active.write_ignore_poison();
        if fresh.version <= active.version {
            return Err(RoutingError::Config(format!(
                "scorecard version must advance: active {} >= new {}",
                active.version, fresh.version
            )));
        }
        let retired = Arc::clone(&active);
        *active = fresh;
        drop(active);

        self.history.lock_ignore_poison().push(retired);
        tracing::info!(version = self.load().version, "published scorecard snapshot");
        Ok(())
    }

    /// Returns the most recently retired snapshot, if any.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<ScorecardSnapshot>> {
        self.history.lock_ignore_poison().last().map(Arc::clone)
    }

    /// Number of retired snapshots.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock_ignore_poison().len()
    }
}

impl Default for ScorecardStore {
    fn default() -> Self {
        Self::new(ScorecardSnapshot::empty())
    }
}

/// On-disk snapshot history used by the operator CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Snapshots oldest first; the last entry is the active version.
    pub snapshots: Vec<ScorecardSnapshot>,
}

impl SnapshotFile {
    /// Loads the snapshot history from a JSON file, or returns an empty
    /// history if the file does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&content)?;
        Ok(file)
    }

    /// Saves the snapshot history as JSON.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The active (latest) snapshot, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ScorecardSnapshot> {
        self.snapshots.last()
    }

    /// The snapshot preceding the active one, if any.
    #[must_use]
    pub fn previous(&self) -> Option<&ScorecardSnapshot> {
        self.snapshots.len().checked_sub(2).and_then(|index| self.snapshots.get(index))
    }
}
