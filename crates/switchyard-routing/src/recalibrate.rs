//! Offline recalibration: telemetry in, a new scorecard snapshot out.
//!
//! The job folds the decision log into per-(model, task) observations,
//! standardizes accept rates across models, blends them with external priors
//! under decaying pseudo-sample weight, and publishes the result as the next
//! snapshot version. Backends without new evidence carry their previous card
//! forward unchanged.

use crate::scorecard::{ScoreCard, ScorecardSnapshot};
use crate::telemetry::{self, DecisionWithFeedback, Outcome};
use crate::{Result, RoutingError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use switchyard_core::{ModelId, TaskType};

/// External quality priors keyed by model, then task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorTable {
    /// Prior quality z-scores.
    pub priors: HashMap<ModelId, HashMap<TaskType, f64>>,
}

impl PriorTable {
    /// Looks up the prior for a (model, task) pair.
    #[must_use]
    pub fn prior(&self, model: &ModelId, task_type: TaskType) -> Option<f64> {
        self.priors.get(model).and_then(|tasks| tasks.get(&task_type)).copied()
    }

    /// Builder insert for tests and static configuration.
    #[must_use]
    pub fn with_prior(mut self, model: ModelId, task_type: TaskType, quality_z: f64) -> Self {
        self.priors.entry(model).or_default().insert(task_type, quality_z);
        self
    }
}

/// Where external benchmark priors come from.
pub trait PriorSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Fetches the current prior table.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is unreachable; the job then runs
    /// degraded, reusing the previous snapshot's beliefs as priors.
    fn fetch(&self) -> Result<PriorTable>;
}

/// Priors read from a TOML file refreshed out of band.
pub struct FilePriorSource {
    path: std::path::PathBuf,
}

impl FilePriorSource {
    /// Creates a source over the given file.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriorSource for FilePriorSource {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch(&self) -> Result<PriorTable> {
        let contents = std::fs::read_to_string(&self.path)?;
        toml::from_str(&contents)
            .map_err(|error| RoutingError::Recalibration(format!("prior file: {error}")))
    }
}

/// Fixed in-memory priors, for tests and air-gapped deployments.
pub struct StaticPriorSource {
    table: PriorTable,
}

impl StaticPriorSource {
    /// Creates a source returning the given table.
    #[must_use]
    pub fn new(table: PriorTable) -> Self {
        Self { table }
    }
}

impl PriorSource for StaticPriorSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self) -> Result<PriorTable> {
        Ok(self.table.clone())
    }
}

/// Raw per-(model, task) evidence accumulated from the log.
#[derive(Debug, Default)]
struct Observation {
    accepted: u64,
    total: u64,
    latencies_ms: Vec<u64>,
    costs: Vec<f64>,
}

impl Observation {
    fn accept_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.total as f64
    }
}

/// The recalibration job.
pub struct RecalibrationJob {
    /// Pseudo-sample weight of the external prior; evidence beyond this many
    /// samples dominates it.
    pub prior_pseudo_samples: f64,
}

impl Default for RecalibrationJob {
    fn default() -> Self {
        Self {
            prior_pseudo_samples: 50.0,
        }
    }
}

impl RecalibrationJob {
    /// Creates a job with the given prior pseudo-sample weight.
    #[must_use]
    pub fn new(prior_pseudo_samples: f64) -> Self {
        Self {
            prior_pseudo_samples,
        }
    }

    /// Runs one recalibration: reads the telemetry log, fetches priors, and
    /// builds the successor of `previous`.
    ///
    /// The log is append-only, so `previous.computed_at` acts as the
    /// high-water mark: only records newer than it count as fresh evidence,
    /// and each record is folded into exactly one snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the telemetry log cannot be read. A prior
    /// source failure does not fail the run; the new snapshot is marked
    /// `degraded_prior` and reuses the previous beliefs as priors.
    pub fn run(
        &self,
        log_path: &Path,
        priors: &dyn PriorSource,
        previous: &ScorecardSnapshot,
    ) -> Result<ScorecardSnapshot> {
        let records = telemetry::read_log(log_path)?;
        let fresh: Vec<DecisionWithFeedback> = match previous.computed_at {
            Some(mark) => records
                .into_iter()
                .filter(|record| record.decision.recorded_at > mark)
                .collect(),
            None => records,
        };
        let observations = Self::collect(&fresh);

        let (prior_table, degraded) = match priors.fetch() {
            Ok(table) => (table, false),
            Err(error) => {
                tracing::warn!(source = priors.name(), %error, "prior source unreachable, running degraded");
                (Self::priors_from_snapshot(previous), true)
            }
        };

        let mut next = ScorecardSnapshot {
            version: previous.version + 1,
            computed_at: Some(Utc::now()),
            degraded_prior: degraded,
            cards: previous.cards.clone(),
        };

        // Standardize accept rates across models within each task, so a
        // card's quality_z means "relative to the other backends on this
        // task" regardless of absolute acceptance levels.
        let standardized = Self::standardize(&observations);

        for ((model, task_type), observation) in &observations {
            let observed_z = standardized
                .get(&(model.clone(), *task_type))
                .copied()
                .unwrap_or(0.0);
            let prior_z = prior_table
                .prior(model, *task_type)
                .or_else(|| previous.card(model, *task_type).map(|card| card.quality_z))
                .unwrap_or(0.0);

            let sample_count = observation.total;
            let previous_card = previous.card(model, *task_type).copied();
            let carried = previous_card.map_or(0, |card| card.sample_count);

            // The previous card stands in for the evidence behind it, so
            // fresh records extend the posterior instead of restarting it.
            let posterior_z = previous_card.map_or(prior_z, |card| card.quality_z);
            let weight = self.prior_pseudo_samples;
            let evidence = sample_count as f64;
            let mass = (weight + carried as f64 + evidence).max(f64::EPSILON);
            let quality_z =
                (weight * prior_z + carried as f64 * posterior_z + evidence * observed_z) / mass;

            let mut latencies = observation.latencies_ms.clone();
            latencies.sort_unstable();
            let card = ScoreCard {
                quality_z,
                latency_p50_ms: percentile_u64(&latencies, 0.50)
                    .or_else(|| previous_card.map(|card| card.latency_p50_ms))
                    .unwrap_or_else(|| ScoreCard::neutral().latency_p50_ms),
                latency_p95_ms: percentile_u64(&latencies, 0.95)
                    .or_else(|| previous_card.map(|card| card.latency_p95_ms))
                    .unwrap_or_else(|| ScoreCard::neutral().latency_p95_ms),
                cost_observed: mean(&observation.costs)
                    .or_else(|| previous_card.map(|card| card.cost_observed))
                    .unwrap_or(0.0),
                sample_count: carried + sample_count,
                prior_weight: weight / mass,
            };
            next.insert(model.clone(), *task_type, card);
        }

        // Seed cards for models the log never saw but the priors know.
        for (model, tasks) in &prior_table.priors {
            for (task_type, prior_z) in tasks {
                if next.card(model, *task_type).is_none() {
                    next.insert(model.clone(), *task_type, ScoreCard::from_prior(*prior_z));
                }
            }
        }

        tracing::info!(
            version = next.version,
            cards = next.card_count(),
            degraded = next.degraded_prior,
            "recalibration complete"
        );
        Ok(next)
    }

    /// Folds decisions into per-(model, task) observations. Every attempt
    /// contributes latency and cost; quality evidence comes from feedback
    /// when present and from the confidence score otherwise. Cancelled
    /// requests contribute no quality signal.
    fn collect(records: &[DecisionWithFeedback]) -> HashMap<(ModelId, TaskType), Observation> {
        let mut observations: HashMap<(ModelId, TaskType), Observation> = HashMap::new();

        for record in records {
            let decision = &record.decision;
            for attempt in &decision.attempts {
                let entry = observations
                    .entry((attempt.model.clone(), decision.task_type))
                    .or_default();
                if attempt.error.is_none() {
                    entry.latencies_ms.push(attempt.latency_ms);
                    entry.costs.push(attempt.cost_usd);
                }

                let is_chosen = decision.chosen.as_ref() == Some(&attempt.model);
                if decision.outcome == Outcome::Cancelled {
                    continue;
                }
                let accepted = if is_chosen && record.feedback.is_some() {
                    record.feedback.as_ref().map(|feedback| feedback.accepted)
                } else {
                    attempt.confidence.map(|confidence| confidence >= 0.7)
                };
                if let Some(accepted) = accepted {
                    entry.total += 1;
                    if accepted {
                        entry.accepted += 1;
                    }
                }
            }
        }
        observations
    }

    /// Z-standardizes accept rates across models, per task.
    fn standardize(
        observations: &HashMap<(ModelId, TaskType), Observation>,
    ) -> HashMap<(ModelId, TaskType), f64> {
        let mut by_task: HashMap<TaskType, Vec<f64>> = HashMap::new();
        for ((_, task_type), observation) in observations {
            if observation.total > 0 {
                by_task.entry(*task_type).or_default().push(observation.accept_rate());
            }
        }

        let mut stats: HashMap<TaskType, (f64, f64)> = HashMap::new();
        for (task_type, rates) in &by_task {
            let mean = rates.iter().sum::<f64>() / rates.len() as f64;
            let variance =
                rates.iter().map(|rate| (rate - mean).powi(2)).sum::<f64>() / rates.len() as f64;
            stats.insert(*task_type, (mean, variance.sqrt()));
        }

        observations
            .iter()
            .filter(|(_, observation)| observation.total > 0)
            .map(|((model, task_type), observation)| {
                let (mean, stddev) = stats.get(task_type).copied().unwrap_or((0.0, 0.0));
                let score = if stddev > f64::EPSILON {
                    (observation.accept_rate() - mean) / stddev
                } else {
                    0.0
                };
                ((model.clone(), *task_type), score)
            })
            .collect()
    }

    /// Extracts a prior table out of an existing snapshot, for degraded runs.
    fn priors_from_snapshot(snapshot: &ScorecardSnapshot) -> PriorTable {
        let mut table = PriorTable::default();
        for (model, tasks) in &snapshot.cards {
            for (task_type, card) in tasks {
                table = table.with_prior(model.clone(), *task_type, card.quality_z);
            }
        }
        table
    }
}

/// One changed card between two snapshot versions.
#[derive(Debug, Clone, Serialize)]
pub struct CardDelta {
    /// Model whose card changed.
    pub model: ModelId,
    /// Task the card covers.
    pub task_type: TaskType,
    /// Quality before, when the card existed.
    pub quality_before: Option<f64>,
    /// Quality after.
    pub quality_after: f64,
    /// Samples added by the newer snapshot.
    pub samples_added: u64,
}

/// Cards that differ between two snapshots, sorted by model then task for
/// stable CLI output.
#[must_use]
pub fn diff(older: &ScorecardSnapshot, newer: &ScorecardSnapshot) -> Vec<CardDelta> {
    let mut deltas = Vec::new();
    for (model, tasks) in &newer.cards {
        for (task_type, card) in tasks {
            let before = older.card(model, *task_type);
            let changed = before.is_none_or(|previous| {
                (previous.quality_z - card.quality_z).abs() > 1e-9
                    || previous.sample_count != card.sample_count
            });
            if changed {
                deltas.push(CardDelta {
                    model: model.clone(),
                    task_type: *task_type,
                    quality_before: before.map(|previous| previous.quality_z),
                    quality_after: card.quality_z,
                    samples_added: card
                        .sample_count
                        .saturating_sub(before.map_or(0, |previous| previous.sample_count)),
                });
            }
        }
    }
    deltas.sort_by(|left, right| {
        left.model
            .cmp(&right.model)
            .then_with(|| format!("{:?}", left.task_type).cmp(&format!("{:?}", right.task_type)))
    });
    deltas
}

/// Percentile over a pre-sorted sample, `None` when empty.
fn percentile_u64(sorted: &[u64], fraction: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (fraction * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank.min(sorted.len() - 1)).copied()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{AttemptRecord, RoutingDecision, TelemetrySink, UserFeedback};
    use switchyard_core::{RequestId, TenantId};

    fn attempt(model: &str, confidence: f64, latency_ms: u64, cost: f64) -> AttemptRecord {
        AttemptRecord {
            model: ModelId::new(model),
            latency_ms,
            cost_usd: cost,
            confidence: Some(confidence),
            estimator: Some("static_prior".to_owned()),
            error: None,
        }
    }

    fn decision(model: &str, confidence: f64, latency_ms: u64, cost: f64) -> RoutingDecision {
        RoutingDecision {
            request_id: RequestId::new(),
            tenant_id: TenantId::new("acme"),
            task_type: TaskType::Chat,
            recorded_at: Utc::now(),
            excluded: Vec::new(),
            ranked: vec![ModelId::new(model)],
            chosen: Some(ModelId::new(model)),
            attempts: vec![attempt(model, confidence, latency_ms, cost)],
            outcome: Outcome::Success,
            total_cost_usd: cost,
            total_latency_ms: latency_ms,
            policy_overrides_applied: Vec::new(),
            scorecard_version: 1,
        }
    }

    async fn write_log(path: &Path, decisions: Vec<RoutingDecision>, feedback: Vec<UserFeedback>) {
        let sink = TelemetrySink::open(path).expect("open sink");
        for entry in decisions {
            sink.record_decision(entry);
        }
        for entry in feedback {
            sink.record_feedback(entry);
        }
        sink.flush().await.expect("flush");
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_accepted_model_scores_above_rejected_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");

        let mut decisions = Vec::new();
        for _ in 0..20 {
            decisions.push(decision("good", 0.9, 100, 0.001));
            decisions.push(decision("bad", 0.2, 100, 0.001));
        }
        write_log(&path, decisions, Vec::new()).await;

        let job = RecalibrationJob::new(10.0);
        let next = job
            .run(&path, &StaticPriorSource::new(PriorTable::default()), &ScorecardSnapshot::empty())
            .expect("run");

        let good = next.card(&ModelId::new("good"), TaskType::Chat).expect("good card");
        let bad = next.card(&ModelId::new("bad"), TaskType::Chat).expect("bad card");
        assert!(good.quality_z > bad.quality_z);
        assert_eq!(next.version, 1);
        assert!(!next.degraded_prior);
    }

    #[tokio::test]
    async fn test_feedback_overrides_confidence_for_chosen_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");

        // High confidence but users rejected every response.
        let decisions: Vec<RoutingDecision> =
            (0..10).map(|_| decision("overrated", 0.95, 100, 0.001)).collect();
        let feedback = decisions
            .iter()
            .map(|entry| UserFeedback {
                request_id: entry.request_id,
                accepted: false,
                recorded_at: Utc::now(),
            })
            .collect();
        let mut all = decisions;
        all.extend((0..10).map(|_| decision("steady", 0.8, 100, 0.001)));
        write_log(&path, all, feedback).await;

        let job = RecalibrationJob::new(5.0);
        let next = job
            .run(&path, &StaticPriorSource::new(PriorTable::default()), &ScorecardSnapshot::empty())
            .expect("run");

        let overrated = next.card(&ModelId::new("overrated"), TaskType::Chat).expect("card");
        let steady = next.card(&ModelId::new("steady"), TaskType::Chat).expect("card");
        assert!(steady.quality_z > overrated.quality_z);
    }

    #[tokio::test]
    async fn test_prior_dominates_with_thin_evidence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        write_log(&path, vec![decision("newcomer", 0.2, 100, 0.001)], Vec::new()).await;

        let priors = PriorTable::default().with_prior(ModelId::new("newcomer"), TaskType::Chat, 1.5);
        let job = RecalibrationJob::new(50.0);
        let next = job
            .run(&path, &StaticPriorSource::new(priors), &ScorecardSnapshot::empty())
            .expect("run");

        let card = next.card(&ModelId::new("newcomer"), TaskType::Chat).expect("card");
        // One sample against fifty pseudo-samples barely moves the prior.
        assert!(card.quality_z > 1.3);
        assert!(card.prior_weight > 0.9);
    }

    #[tokio::test]
    async fn test_unseen_models_carry_forward() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        write_log(&path, vec![decision("active", 0.9, 100, 0.001)], Vec::new()).await;

        let previous = ScorecardSnapshot::empty().with_card(
            ModelId::new("dormant"),
            TaskType::Chat,
            ScoreCard::from_prior(0.8),
        );
        let job = RecalibrationJob::default();
        let next = job
            .run(&path, &StaticPriorSource::new(PriorTable::default()), &previous)
            .expect("run");

        let dormant = next.card(&ModelId::new("dormant"), TaskType::Chat).expect("carried card");
        assert!((dormant.quality_z - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rerun_over_same_log_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        let decisions: Vec<RoutingDecision> =
            (0..10).map(|_| decision("steady", 0.9, 100, 0.001)).collect();
        write_log(&path, decisions, Vec::new()).await;

        let job = RecalibrationJob::default();
        let source = StaticPriorSource::new(PriorTable::default());
        let first = job
            .run(&path, &source, &ScorecardSnapshot::empty())
            .expect("first run");
        let card_v1 =
            first.card(&ModelId::new("steady"), TaskType::Chat).copied().expect("card");
        assert_eq!(card_v1.sample_count, 10);

        // Nightly rerun over the same append-only log: nothing is newer than
        // the first snapshot's mark, so the evidence must not grow.
        let second = job.run(&path, &source, &first).expect("second run");
        let card_v2 =
            second.card(&ModelId::new("steady"), TaskType::Chat).copied().expect("card");
        assert_eq!(card_v2.sample_count, 10);
        assert!((card_v2.quality_z - card_v1.quality_z).abs() < 1e-9);
        assert_eq!(second.version, first.version + 1);
    }

    #[tokio::test]
    async fn test_records_after_the_mark_extend_evidence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        write_log(
            &path,
            (0..10).map(|_| decision("steady", 0.9, 100, 0.001)).collect(),
            Vec::new(),
        )
        .await;

        let job = RecalibrationJob::default();
        let source = StaticPriorSource::new(PriorTable::default());
        let first = job
            .run(&path, &source, &ScorecardSnapshot::empty())
            .expect("first run");

        // The sink appends, so these land after the first snapshot's mark.
        write_log(
            &path,
            (0..5).map(|_| decision("steady", 0.9, 100, 0.001)).collect(),
            Vec::new(),
        )
        .await;

        let second = job.run(&path, &source, &first).expect("second run");
        let card =
            second.card(&ModelId::new("steady"), TaskType::Chat).copied().expect("card");
        assert_eq!(card.sample_count, 15);
    }

    #[tokio::test]
    async fn test_prior_failure_runs_degraded() {
        struct DownSource;
        impl PriorSource for DownSource {
            fn name(&self) -> &str {
                "down"
            }
            fn fetch(&self) -> Result<PriorTable> {
                Err(RoutingError::Recalibration("unreachable".to_owned()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.jsonl");
        write_log(&path, vec![decision("survivor", 0.9, 100, 0.001)], Vec::new()).await;

        let previous = ScorecardSnapshot {
            version: 3,
            ..ScorecardSnapshot::empty()
        };
        let next = RecalibrationJob::default()
            .run(&path, &DownSource, &previous)
            .expect("degraded run still succeeds");

        assert!(next.degraded_prior);
        assert_eq!(next.version, 4);
    }

    #[test]
    fn test_diff_reports_changed_cards() {
        let older = ScorecardSnapshot::empty().with_card(
            ModelId::new("model-a"),
            TaskType::Chat,
            ScoreCard::from_prior(0.1),
        );
        let mut newer = older.clone();
        newer.version = 2;
        newer.insert(
            ModelId::new("model-a"),
            TaskType::Chat,
            ScoreCard {
                quality_z: 0.6,
                sample_count: 40,
                ..ScoreCard::from_prior(0.1)
            },
        );
        newer.insert(ModelId::new("model-b"), TaskType::Chat, ScoreCard::from_prior(0.3));

        let deltas = diff(&older, &newer);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].model, ModelId::new("model-a"));
        assert!((deltas[0].quality_after - 0.6).abs() < 1e-9);
        assert_eq!(deltas[0].samples_added, 40);
        assert!(deltas[1].quality_before.is_none());
    }

    #[test]
    fn test_percentiles() {
        let sorted = [10, 20, 30, 40, 50];
        assert_eq!(percentile_u64(&sorted, 0.50), Some(30));
        assert_eq!(percentile_u64(&sorted, 0.95), Some(50));
        assert_eq!(percentile_u64(&[], 0.50), None);
    }
}
