use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use steward::core::{ReplicaConfig, ReplicaRegistry};
use steward::router::{ReplicaSelector, SelectionStrategy};

fn registry_with(count: usize) -> ReplicaRegistry<()> {
    let registry = ReplicaRegistry::new();
    for i in 0..count {
        let config = ReplicaConfig::new(format!("replica-{}", i), format!("10.0.0.{}:5432", i))
            .with_weight(1 + i % 3);
        registry.insert(config, ()).unwrap();
    }
    registry
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("replica_selection");

    for replica_count in [2usize, 8, 32] {
        let registry = registry_with(replica_count);
        for strategy in [
            SelectionStrategy::RoundRobin,
            SelectionStrategy::WeightedRoundRobin,
            SelectionStrategy::WeightedRandom,
        ] {
            let selector = ReplicaSelector::new(strategy, 3);
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), replica_count),
                &registry,
                |b, registry| {
                    b.iter(|| black_box(selector.select(registry)));
                },
            );
        }
    }

    group.finish();
}

fn bench_selection_with_unhealthy(c: &mut Criterion) {
    let registry = registry_with(16);
    for i in (0..16).step_by(2) {
        registry.update_health(&format!("replica-{}", i), |health, _| health.is_healthy = false);
    }
    let selector = ReplicaSelector::new(SelectionStrategy::RoundRobin, 3);

    c.bench_function("round_robin_half_unhealthy", |b| {
        b.iter(|| black_box(selector.select(&registry)));
    });
}

criterion_group!(benches, bench_selection, bench_selection_with_unhealthy);
criterion_main!(benches);
