use ace::{
    config as configure_dashboard, create_state, delete_state, read_charts, submit_refresh,
    ComputeFn, Dependency, EstimateFn, NodeId, NodeKind, Outcome, PolicyTag, Registry,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

static TRACING_INIT: Once = Once::new();

/// Route the crate's `tracing` output through a test-scoped writer so a
/// failing scenario prints the scheduler/state-manager log lines that led
/// up to it instead of swallowing them.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct EchoCompute;
impl ComputeFn for EchoCompute {
    fn compute(&self, form_data: &serde_json::Value) -> Outcome {
        Outcome::ok(form_data.clone())
    }
}

struct FixedEstimate;
impl EstimateFn for FixedEstimate {
    fn estimate(&self, _form_data: &serde_json::Value) -> Result<i64, String> {
        Ok(1)
    }
}

fn star_deps(n: i64) -> Vec<Dependency> {
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

fn wait_for_commit(registry: &Registry, dash_id: u64, ts: i64) {
    let dashboard = registry.get(dash_id).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while dashboard.state.last_committed() < ts && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(dashboard.state.last_committed(), ts, "refresh never committed");
}

#[test]
fn full_lifecycle_submit_refresh_read_delete() {
    init_tracing();
    let registry = Registry::new();
    let dash_id = 1;

    create_state(
        &registry,
        dash_id,
        star_deps(3),
        Arc::new(EchoCompute),
        Arc::new(FixedEstimate),
    )
    .unwrap();

    configure_dashboard(
        &registry,
        dash_id,
        PolicyTag::Gcpb,
        0,
        true,
        true,
        true,
        true,
        "",
    )
    .unwrap();

    let seeds: HashSet<NodeId> = [0].into_iter().collect();
    let viewport: HashSet<NodeId> = [1, 2, 3].into_iter().collect();
    let mut form_data = HashMap::new();
    for &id in &viewport {
        form_data.insert(id, serde_json::json!({"node": id}));
    }

    let ts = submit_refresh(&registry, dash_id, seeds, viewport.clone(), form_data, 1).unwrap();
    wait_for_commit(&registry, dash_id, ts);

    let response = read_charts(&registry, dash_id, viewport, 1).unwrap();
    assert_eq!(response.snapshot.len(), 3);
    for chart in response.snapshot.values() {
        assert_eq!(chart.ts, ts);
        assert_ne!(chart.version_result, serde_json::Value::String("IV".into()));
    }

    delete_state(&registry, dash_id).unwrap();
    assert!(registry.get(dash_id).is_err());
}

#[test]
fn icnb_read_before_refresh_lands_sees_sentinel() {
    init_tracing();
    let registry = Registry::new();
    let dash_id = 2;

    create_state(
        &registry,
        dash_id,
        star_deps(1),
        Arc::new(EchoCompute),
        Arc::new(FixedEstimate),
    )
    .unwrap();
    configure_dashboard(
        &registry,
        dash_id,
        PolicyTag::Icnb,
        0,
        true,
        true,
        true,
        true,
        "",
    )
    .unwrap();

    let viewport: HashSet<NodeId> = [1].into_iter().collect();
    let response = read_charts(&registry, dash_id, viewport, 1).unwrap();
    let chart = &response.snapshot[&1];
    assert_eq!(chart.ts, ace::node::START_TS);

    delete_state(&registry, dash_id).unwrap();
}

#[test]
fn duplicate_create_and_unknown_dashboard_are_rejected() {
    init_tracing();
    let registry = Registry::new();
    create_state(
        &registry,
        3,
        star_deps(1),
        Arc::new(EchoCompute),
        Arc::new(FixedEstimate),
    )
    .unwrap();

    let dup = create_state(
        &registry,
        3,
        star_deps(1),
        Arc::new(EchoCompute),
        Arc::new(FixedEstimate),
    );
    assert!(dup.is_err());

    let missing = read_charts(&registry, 404, HashSet::new(), 0);
    assert!(missing.is_err());

    delete_state(&registry, 3).unwrap();
}
