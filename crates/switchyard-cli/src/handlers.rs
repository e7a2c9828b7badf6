//! Command handlers for the operator CLI.

use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};
use switchyard_core::RegistryDocument;
use switchyard_routing::{
    diff, FilePriorSource, PriorSource, PriorTable, RecalibrationJob, ScorecardSnapshot,
    SnapshotFile, StaticPriorSource,
};

/// Runs one recalibration and appends the result to the snapshot history.
///
/// # Errors
///
/// Returns an error when the telemetry log or the snapshot history cannot be
/// read or written.
#[allow(clippy::print_stdout, reason = "Operator-facing report output")]
pub fn handle_recalibrate(
    log: &Path,
    snapshots_path: &Path,
    priors: Option<PathBuf>,
    prior_weight: f64,
) -> Result<()> {
    let mut history = SnapshotFile::load(snapshots_path)
        .with_context(|| format!("loading snapshot history from {}", snapshots_path.display()))?;
    let previous = history.active().cloned().unwrap_or_else(ScorecardSnapshot::empty);

    let source: Box<dyn PriorSource> = match priors {
        Some(path) => Box::new(FilePriorSource::new(path)),
        None => Box::new(StaticPriorSource::new(PriorTable::default())),
    };

    let job = RecalibrationJob::new(prior_weight);
    let next = job
        .run(log, source.as_ref(), &previous)
        .with_context(|| format!("recalibrating from {}", log.display()))?;

    let deltas = diff(&previous, &next);
    println!(
        "published snapshot v{} ({} cards, {} changed{})",
        next.version,
        next.card_count(),
        deltas.len(),
        if next.degraded_prior { ", degraded priors" } else { "" }
    );
    for delta in &deltas {
        let before = delta
            .quality_before
            .map_or_else(|| "new".to_owned(), |value| format!("{value:+.3}"));
        println!(
            "  {} / {:?}: {} -> {:+.3} (+{} samples)",
            delta.model, delta.task_type, before, delta.quality_after, delta.samples_added
        );
    }

    history.snapshots.push(next);
    history
        .save(snapshots_path)
        .with_context(|| format!("saving snapshot history to {}", snapshots_path.display()))?;
    Ok(())
}

/// Prints the active snapshot's cards, sorted by model then task.
///
/// # Errors
///
/// Returns an error when the history cannot be read or holds no snapshot.
#[allow(clippy::print_stdout, reason = "Operator-facing report output")]
pub fn handle_scorecards_show(snapshots_path: &Path) -> Result<()> {
    let history = SnapshotFile::load(snapshots_path)?;
    let Some(active) = history.active() else {
        bail!("no snapshot in {}", snapshots_path.display());
    };

    println!(
        "snapshot v{}{}",
        active.version,
        if active.degraded_prior { " (degraded priors)" } else { "" }
    );
    let mut models: Vec<_> = active.cards.keys().collect();
    models.sort();
    for model in models {
        let Some(tasks) = active.cards.get(model) else {
            continue;
        };
        let mut task_types: Vec<_> = tasks.keys().copied().collect();
        task_types.sort_by_key(|task_type| format!("{task_type:?}"));
        for task_type in task_types {
            let Some(card) = tasks.get(&task_type) else {
                continue;
            };
            println!(
                "  {model} / {task_type:?}: quality {:+.3}, p50 {}ms, p95 {}ms, ${:.5}/call, {} samples (prior weight {:.2})",
                card.quality_z,
                card.latency_p50_ms,
                card.latency_p95_ms,
                card.cost_observed,
                card.sample_count,
                card.prior_weight
            );
        }
    }
    Ok(())
}

/// Prints the cards that changed between the previous and active snapshots.
///
/// # Errors
///
/// Returns an error when the history cannot be read or holds fewer than two
/// snapshots.
#[allow(clippy::print_stdout, reason = "Operator-facing report output")]
pub fn handle_scorecards_diff(snapshots_path: &Path) -> Result<()> {
    let history = SnapshotFile::load(snapshots_path)?;
    let (Some(active), Some(previous)) = (history.active(), history.previous()) else {
        bail!("need at least two snapshots in {}", snapshots_path.display());
    };

    let deltas = diff(previous, active);
    println!("v{} -> v{}: {} cards changed", previous.version, active.version, deltas.len());
    for delta in &deltas {
        let before = delta
            .quality_before
            .map_or_else(|| "new".to_owned(), |value| format!("{value:+.3}"));
        println!(
            "  {} / {:?}: {} -> {:+.3} (+{} samples)",
            delta.model, delta.task_type, before, delta.quality_after, delta.samples_added
        );
    }
    Ok(())
}

/// Lists the backends in a registry document.
///
/// # Errors
///
/// Returns an error when the document cannot be read or parsed.
#[allow(clippy::print_stdout, reason = "Operator-facing report output")]
pub fn handle_registry_list(registry_path: &Path) -> Result<()> {
    let document = RegistryDocument::load(registry_path)
        .with_context(|| format!("loading registry from {}", registry_path.display()))?;

    println!("registry v{} ({} backends)", document.version, document.models.len());
    let mut models = document.models;
    models.sort_by(|left, right| left.id.cmp(&right.id));
    for descriptor in &models {
        let capabilities: Vec<String> = descriptor
            .task_capabilities
            .iter()
            .map(|task_type| format!("{task_type:?}").to_lowercase())
            .collect();
        println!(
            "  {} [{:?}] {} ${:.5}/unit  tasks: {}",
            descriptor.id,
            descriptor.provider,
            descriptor.privacy_tier,
            descriptor.cost_per_unit,
            capabilities.join(", ")
        );
    }
    Ok(())
}
