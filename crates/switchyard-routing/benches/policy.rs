//! Benchmarks for candidate selection over a populated registry.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    missing_docs,
    reason = "Benchmark code"
)]

use criterion::{Criterion, criterion_group, criterion_main};
use std::collections::HashSet;
use std::hint::black_box;
use switchyard_core::{ModelDescriptor, ModelId, PrivacyTier, ProviderKind, TaskType, TenantPolicy};
use switchyard_routing::{
    ModelRegistry, PolicyEngine, PolicyInputs, RequestMeta, ScoreCard, ScorecardSnapshot,
};

fn populated(model_count: usize) -> (ModelRegistry, ScorecardSnapshot) {
    let mut registry = ModelRegistry::new();
    let mut snapshot = ScorecardSnapshot::empty();
    snapshot.version = 1;

    for index in 0..model_count {
        let id = format!("backend-{index:03}");
        let tier = if index % 3 == 0 {
            PrivacyTier::LocalOnly
        } else {
            PrivacyTier::Open
        };
        let kind = if tier == PrivacyTier::LocalOnly {
            ProviderKind::SelfHosted
        } else {
            ProviderKind::Remote
        };
        registry = registry.with_model(
            ModelDescriptor::new(id.as_str(), kind, tier)
                .with_capabilities(vec![TaskType::Chat, TaskType::Summarize])
                .with_cost_per_unit(0.0005 * (index + 1) as f64),
        );
        snapshot.insert(
            ModelId::new(id.as_str()),
            TaskType::Chat,
            ScoreCard {
                quality_z: (index as f64).mul_add(0.01, -0.5),
                latency_p50_ms: 100 + (index as u64 * 7) % 400,
                latency_p95_ms: 300 + (index as u64 * 13) % 900,
                cost_observed: 0.0005 * (index + 1) as f64,
                sample_count: 100,
                prior_weight: 0.3,
            },
        );
    }
    (registry, snapshot)
}

fn bench_select_candidates(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("select_candidates");
    for model_count in [8, 64, 256] {
        let (registry, snapshot) = populated(model_count);
        let blocked = HashSet::new();
        let policy = TenantPolicy::default();
        let engine = PolicyEngine::default();
        let meta = RequestMeta {
            task_type: TaskType::Chat,
            privacy_requirement: None,
            max_cost: None,
        };

        group.bench_function(format!("{model_count}_models"), |bencher| {
            bencher.iter(|| {
                let inputs = PolicyInputs {
                    registry: &registry,
                    scorecards: &snapshot,
                    blocked: &blocked,
                };
                black_box(engine.select_candidates(black_box(&meta), &policy, &inputs))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_candidates);
criterion_main!(benches);
