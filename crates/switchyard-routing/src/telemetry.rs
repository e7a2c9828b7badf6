//! Decision records and the append-only telemetry log.
//!
//! Every routed request produces exactly one [`RoutingDecision`], emitted on
//! completion or cancellation. Records are sent over an unbounded channel to
//! a background task that appends JSON lines to the log file, so emission
//! never blocks the request path. The same log feeds the recalibration job.

use crate::policy::ExcludedCandidate;
use crate::{Result, RoutingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use switchyard_core::{ModelId, RequestId, TaskType, TenantId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Terminal state of a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A backend answered and confidence cleared the threshold.
    Success,
    /// The cascade exhausted its depth without clearing the confidence
    /// threshold; the best response seen was returned anyway.
    LowConfidenceExhausted,
    /// Rejected before dispatch: the tenant's budget could not cover the
    /// estimated cost.
    BudgetExceeded,
    /// No candidate survived filtering, or every attempt failed.
    NoEligibleModel,
    /// The caller went away before a terminal outcome.
    Cancelled,
}

/// A policy relaxation the engine applied to keep the request servable.
///
/// Recorded as a list so future relaxations extend the schema instead of
/// adding one boolean per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOverride {
    /// The tenant's quality floor was waived to keep the plan non-empty.
    QualityFloorWaived,
}

/// One backend attempt within a cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Backend tried.
    pub model: ModelId,
    /// Wall-clock latency of the attempt.
    pub latency_ms: u64,
    /// Billed cost of the attempt in USD.
    pub cost_usd: f64,
    /// Confidence score, when the attempt produced a response.
    pub confidence: Option<f64>,
    /// Estimator that produced the score.
    pub estimator: Option<String>,
    /// Error text for failed attempts.
    pub error: Option<String>,
}

/// The per-request decision record, one JSON line in the telemetry log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Request identifier.
    pub request_id: RequestId,
    /// Tenant that issued the request.
    pub tenant_id: TenantId,
    /// Task type requested.
    pub task_type: TaskType,
    /// When the record was emitted.
    pub recorded_at: DateTime<Utc>,
    /// Candidates excluded before dispatch, with reason codes.
    pub excluded: Vec<ExcludedCandidate>,
    /// Cascade order the policy engine produced.
    pub ranked: Vec<ModelId>,
    /// Backend that produced the returned response, if any.
    pub chosen: Option<ModelId>,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Terminal state.
    pub outcome: Outcome,
    /// Total billed cost across attempts in USD.
    pub total_cost_usd: f64,
    /// End-to-end latency.
    pub total_latency_ms: u64,
    /// Policy relaxations applied for this request, in application order.
    #[serde(default)]
    pub policy_overrides_applied: Vec<PolicyOverride>,
    /// Version of the scorecard snapshot the decision was made against.
    pub scorecard_version: u64,
}

/// Deferred quality signal attached to a past request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    /// Request the feedback refers to.
    pub request_id: RequestId,
    /// Whether the user accepted the response.
    pub accepted: bool,
    /// When the feedback arrived.
    pub recorded_at: DateTime<Utc>,
}

/// A line in the telemetry log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A completed (or cancelled) routing decision.
    Decision(RoutingDecision),
    /// Feedback for an earlier decision.
    Feedback(UserFeedback),
}

enum SinkMessage {
    Event(TelemetryEvent),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking sink appending telemetry events to a JSONL file.
pub struct TelemetrySink {
    sender: mpsc::UnboundedSender<SinkMessage>,
    writer: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl TelemetrySink {
    /// Opens a sink appending to `path`, spawning the background writer.
    ///
    /// # Errors
    ///
    /// Returns an error when the log file cannot be opened for append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<SinkMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    SinkMessage::Event(event) => {
                        match serde_json::to_string(&event) {
                            Ok(line) => {
                                if let Err(error) = writeln!(file, "{line}") {
                                    tracing::error!(%error, "telemetry write failed");
                                }
                            }
                            Err(error) => {
                                tracing::error!(%error, "telemetry event not serializable");
                            }
                        }
                    }
                    SinkMessage::Flush(done) => {
                        if let Err(error) = file.flush() {
                            tracing::error!(%error, "telemetry flush failed");
                        }
                        if done.send(()).is_err() {
                            tracing::debug!("flush caller went away");
                        }
                    }
                }
            }
        });

        Ok(Self {
            sender,
            writer: Some(writer),
            path,
        })
    }

    /// Path of the log file this sink appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a decision record. Never blocks; a closed channel is logged
    /// and dropped.
    pub fn record_decision(&self, decision: RoutingDecision) {
        self.emit(TelemetryEvent::Decision(decision));
    }

    /// Queues a feedback event for a past request.
    pub fn record_feedback(&self, feedback: UserFeedback) {
        self.emit(TelemetryEvent::Feedback(feedback));
    }

    fn emit(&self, event: TelemetryEvent) {
        if self.sender.send(SinkMessage::Event(event)).is_err() {
            tracing::warn!("telemetry writer gone, event dropped");
        }
    }

    /// Waits until every queued event has reached the file.
    ///
    /// # Errors
    ///
    /// Returns an error when the writer task has already shut down.
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(SinkMessage::Flush(done))
            .map_err(|_| RoutingError::Other("telemetry writer closed".to_owned()))?;
        wait.await
            .map_err(|_| RoutingError::Other("telemetry writer closed".to_owned()))
    }

    /// Stops the writer after draining the queue.
    pub async fn shutdown(mut self) {
        drop(self.sender);
        let Some(writer) = self.writer.take() else {
            return;
        };
        if let Err(error) = writer.await {
            tracing::error!(%error, "telemetry writer join failed");
        }
    }
}

/// A decision joined with any feedback that arrived for it.
#[derive(Debug, Clone)]
pub struct DecisionWithFeedback {
    /// The decision record.
    pub decision: RoutingDecision,
    /// Latest feedback, when any arrived. Re-submitted feedback for the
    /// same request replaces earlier feedback rather than double counting.
    pub feedback: Option<UserFeedback>,
}

/// Reads a telemetry log and folds feedback lines into their decisions.
///
/// Unparseable lines are skipped with a warning so a torn tail write cannot
/// poison recalibration.
///
/// # Errors
///
/// Returns an error when the file cannot be read. A missing file yields an
/// empty list.
pub fn read_log(path: &Path) -> Result<Vec<DecisionWithFeedback>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;

    let mut decisions: Vec<RoutingDecision> = Vec::new();
    let mut feedback_by_request: HashMap<RequestId, UserFeedback> = HashMap::new();
    for (line_number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryEvent>(line) {
            Ok(TelemetryEvent::Decision(decision)) => decisions.push(decision),
            Ok(TelemetryEvent::Feedback(feedback)) => {
                feedback_by_request.insert(feedback.request_id, feedback);
            }
            Err(error) => {
                tracing::warn!(line = line_number + 1, %error, "skipping malformed telemetry line");
            }
        }
    }

    Ok(decisions
        .into_iter()
        .map(|decision| {
            let feedback = feedback_by_request.get(&decision.request_id).cloned();
            DecisionWithFeedback { decision, feedback }
        })
        .collect())
}
