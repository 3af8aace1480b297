use ace::{Dependency, NodeKind, Outcome, PolicyTag, StateManager, StateManagerConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashSet;

fn star_graph(n: u64) -> Vec<Dependency> {
    let mut deps = Vec::new();
    for viz in 1..=n {
        deps.push(Dependency {
            prec: 0,
            prec_kind: NodeKind::BaseTable,
            dep: viz + n,
            dep_kind: NodeKind::Filter,
        });
        deps.push(Dependency {
            prec: viz + n,
            prec_kind: NodeKind::Filter,
            dep: viz,
            dep_kind: NodeKind::Viz,
        });
    }
    deps
}

fn bench_submit_txn(c: &mut Criterion) {
    let sm = StateManager::new(star_graph(64)).unwrap();
    let seeds: HashSet<i64> = [0].into_iter().collect();
    let viewport: HashSet<i64> = (1..=64).collect();

    c.bench_function("submit_txn_star_64", |b| {
        b.iter(|| {
            let (ts, impacted) = sm.submit_txn(&seeds, &viewport, 1).unwrap();
            for &id in &impacted.viz {
                sm.finish_update(id, ts, Outcome::ok(serde_json::json!("done")))
                    .unwrap();
            }
            sm.commit_txn(ts).unwrap();
            black_box(ts);
        });
    });
}

fn bench_read_viewport_policies(c: &mut Criterion) {
    let sm = StateManager::new(star_graph(64)).unwrap();
    let seeds: HashSet<i64> = [0].into_iter().collect();
    let viewport: HashSet<i64> = (1..=64).collect();
    for _ in 0..8 {
        let (ts, impacted) = sm.submit_txn(&seeds, &viewport, 1).unwrap();
        for &id in &impacted.viz {
            sm.finish_update(id, ts, Outcome::ok(serde_json::json!("done")))
                .unwrap();
        }
        sm.commit_txn(ts).unwrap();
    }

    let mut group = c.benchmark_group("read_viewport");
    for policy in [
        PolicyTag::Icnb,
        PolicyTag::Gcnb,
        PolicyTag::Lcmb,
        PolicyTag::Gcpb,
        PolicyTag::Cmva,
    ] {
        sm.configure(StateManagerConfig {
            policy,
            ..StateManagerConfig::default()
        });
        group.bench_function(format!("{policy:?}"), |b| {
            b.iter(|| {
                let result = sm.read_viewport(&viewport, 1).unwrap();
                black_box(result.ts);
            });
        });
    }
    group.finish();
}

fn bench_clean_unused_versions(c: &mut Criterion) {
    c.bench_function("clean_unused_versions_star_64", |b| {
        b.iter_batched(
            || {
                let sm = StateManager::new(star_graph(64)).unwrap();
                let seeds: HashSet<i64> = [0].into_iter().collect();
                let empty: HashSet<i64> = HashSet::new();
                let mut last_ts = 0;
                for _ in 0..16 {
                    let (ts, impacted) = sm.submit_txn(&seeds, &empty, 0).unwrap();
                    for &id in &impacted.viz {
                        sm.finish_update(id, ts, Outcome::ok(serde_json::json!("done")))
                            .unwrap();
                    }
                    sm.commit_txn(ts).unwrap();
                    last_ts = ts;
                }
                black_box(last_ts);
                sm
            },
            |sm| sm.clean_unused_versions(),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_submit_txn,
    bench_read_viewport_policies,
    bench_clean_unused_versions
);
criterion_main!(benches);
