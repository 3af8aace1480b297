//! External collaborators and the free functions that form ACE's
//! transport-agnostic interface. Everything above this module is internal;
//! a driver (HTTP handler, CLI, test harness) only ever calls through here.

use crate::config::{SchedulerConfig, StateManagerConfig};
use crate::error::AceError;
use crate::node::{Entry, NodeId, Outcome};
use crate::registry::Registry;
use crate::view_graph::Dependency;
use std::collections::HashMap;
use std::sync::Arc;

/// The opaque chart-execution engine. Implementations may fail internally;
/// failures are expected to be captured as a non-200 [`Outcome`], not
/// propagated as a Rust error.
pub trait ComputeFn: Send + Sync {
    fn compute(&self, form_data: &serde_json::Value) -> Outcome;
}

/// The opaque cost estimator. Unlike `ComputeFn`, failure here is allowed to
/// propagate as `Err` — the scheduler treats it as "no cost data" and falls
/// back to uniform cost.
pub trait EstimateFn: Send + Sync {
    fn estimate(&self, form_data: &serde_json::Value) -> Result<i64, String>;
}

/// A single node's materialized read result, serialized at the external
/// boundary: `version_result` is the reserved string `"IV"` for an
/// outstanding placeholder, or the concrete outcome otherwise.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChartSnapshot {
    pub ts: i64,
    pub version_result: serde_json::Value,
}

impl From<Entry> for ChartSnapshot {
    fn from(entry: Entry) -> Self {
        match entry {
            Entry::Placeholder { ts } => ChartSnapshot {
                ts,
                version_result: serde_json::Value::String("IV".to_string()),
            },
            Entry::Version { ts, outcome } => ChartSnapshot {
                ts,
                version_result: serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null),
            },
        }
    }
}

/// `read_charts` response envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReadChartsResponse {
    pub ts: i64,
    pub snapshot: HashMap<NodeId, ChartSnapshot>,
}

/// `create_state(dash_id, dependencies)`: registers a new dashboard and
/// starts its scheduler worker. Errs if `dash_id` is already registered.
pub fn create_state(
    registry: &Registry,
    dash_id: u64,
    dependencies: Vec<Dependency>,
    compute: Arc<dyn ComputeFn>,
    estimate: Arc<dyn EstimateFn>,
) -> Result<(), AceError> {
    registry.create_state(
        dash_id,
        dependencies,
        compute,
        estimate,
        SchedulerConfig::default(),
    )
}

/// `config(dash_id, policy_tag, k_relaxed, opt_viewport, opt_exec_time,
/// opt_metrics, opt_skip_write, db_connect_info)`: reconfigures an existing
/// dashboard's consistency policy and scheduler options in place.
#[allow(clippy::too_many_arguments)]
pub fn config(
    registry: &Registry,
    dash_id: u64,
    policy: crate::config::PolicyTag,
    k_relaxed: u32,
    opt_viewport: bool,
    opt_exec_time: bool,
    opt_metrics: bool,
    opt_skip_write: bool,
    db_connect_info: &str,
) -> Result<(), AceError> {
    let config = StateManagerConfig {
        policy,
        k_relaxed,
        opt_viewport,
        opt_exec_time,
        opt_metrics,
        opt_skip_write,
        ..StateManagerConfig::default()
    }
    .with_db_connect_info(db_connect_info);
    registry.config(dash_id, config)
}

/// `delete_state(dash_id)`: shuts down the scheduler and forgets the
/// dashboard. Outstanding reads in flight complete normally.
pub fn delete_state(registry: &Registry, dash_id: u64) -> Result<(), AceError> {
    registry.delete_state(dash_id)
}

/// `submit_refresh(dash_id, nodes_to_refresh, nodes_in_viewport, form_data_per_node) -> ts`.
pub fn submit_refresh(
    registry: &Registry,
    dash_id: u64,
    nodes_to_refresh: std::collections::HashSet<NodeId>,
    nodes_in_viewport: std::collections::HashSet<NodeId>,
    form_data_per_node: HashMap<NodeId, serde_json::Value>,
    duration: u64,
) -> Result<i64, AceError> {
    let dashboard = registry.get(dash_id)?;
    let (ts, impacted) =
        dashboard
            .state
            .submit_txn(&nodes_to_refresh, &nodes_in_viewport, duration)?;

    tracing::debug!(
        dash_id,
        ts,
        seeds = nodes_to_refresh.len(),
        viz = impacted.viz.len(),
        "refresh submitted"
    );

    dashboard.scheduler.submit(crate::scheduler::RefreshJob {
        ts,
        viz_ids: impacted.viz,
        form_data: form_data_per_node,
    })?;

    Ok(ts)
}

/// `read_charts(dash_id, nodes_to_read) -> {ts, snapshot}`.
pub fn read_charts(
    registry: &Registry,
    dash_id: u64,
    nodes_to_read: std::collections::HashSet<NodeId>,
    duration: u64,
) -> Result<ReadChartsResponse, AceError> {
    let dashboard = registry.get(dash_id)?;
    let result = dashboard.state.read_viewport(&nodes_to_read, duration)?;

    tracing::debug!(
        dash_id,
        ts = result.ts,
        entries = result.snapshot.len(),
        "viewport read"
    );

    let snapshot = result
        .snapshot
        .into_iter()
        .map(|(id, entry)| (id, ChartSnapshot::from(entry)))
        .collect();

    Ok(ReadChartsResponse {
        ts: result.ts,
        snapshot,
    })
}
