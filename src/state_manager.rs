//! Dashboard state manager (component C): timestamp allocation, the write
//! path, and the five read-consistency policies.

use crate::config::{PolicyTag, StateManagerConfig};
use crate::error::AceError;
use crate::node::{Entry, NodeId, Outcome, START_TS};
use crate::view_graph::{Dependency, ImpactedSet, ViewGraph};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{HashMap, HashSet};

struct GlobalState {
    cur_ts: i64,
    last_submitted: i64,
    last_committed: i64,
    num_ivs: HashMap<i64, u32>,
}

impl GlobalState {
    fn new() -> Self {
        GlobalState {
            cur_ts: START_TS,
            last_submitted: START_TS,
            last_committed: START_TS,
            num_ivs: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct MetaState {
    view_port_time: HashMap<i64, HashMap<NodeId, u64>>,
    node_metrics: HashMap<NodeId, u64>,
}

/// The materialized result of a `read_viewport` call: the committed
/// timestamp at the time of the call, plus the (possibly empty after the
/// last-read filter) snapshot of changed entries.
pub struct ReadResult {
    pub ts: i64,
    pub snapshot: HashMap<NodeId, Entry>,
}

/// Per-dashboard consistency engine. Guards its own two-lock discipline
/// (`global` before `meta`; node locks live inside [`ViewGraph`] and are
/// never held while either of these is held).
pub struct StateManager {
    view_graph: ViewGraph,
    global: Mutex<GlobalState>,
    meta: Mutex<MetaState>,
    last_read: Mutex<HashMap<NodeId, Entry>>,
    config: RwLock<StateManagerConfig>,
}

impl StateManager {
    pub fn new(dependencies: Vec<Dependency>) -> Result<Self, AceError> {
        let mut view_graph = ViewGraph::new();
        for dep in dependencies {
            view_graph.insert(dep)?;
        }
        view_graph.create_initial_snapshot(START_TS);

        Ok(StateManager {
            view_graph,
            global: Mutex::new(GlobalState::new()),
            meta: Mutex::new(MetaState::default()),
            last_read: Mutex::new(HashMap::new()),
            config: RwLock::new(StateManagerConfig::default()),
        })
    }

    pub fn configure(&self, config: StateManagerConfig) {
        *self.config.write() = config;
    }

    pub fn config_snapshot(&self) -> StateManagerConfig {
        self.config.read().clone()
    }

    pub fn view_graph(&self) -> &ViewGraph {
        &self.view_graph
    }

    pub fn last_submitted(&self) -> i64 {
        self.global.lock().last_submitted
    }

    pub fn last_committed(&self) -> i64 {
        self.global.lock().last_committed
    }

    /// Write path: allocate `ts` under the global lock, expand the impacted
    /// set, install placeholders, then record per-node attention under the
    /// metadata lock.
    pub fn submit_txn(
        &self,
        seed_ids: &HashSet<NodeId>,
        viewport_ids: &HashSet<NodeId>,
        duration: u64,
    ) -> Result<(i64, ImpactedSet), AceError> {
        let (ts, impacted) = {
            let mut global = self.global.lock();
            global.cur_ts += 1;
            let ts = global.cur_ts;
            global.last_submitted = ts;
            let impacted = self.view_graph.create_snapshot_placeholder(seed_ids, ts)?;
            global.num_ivs.insert(ts, impacted.viz.len() as u32);
            (ts, impacted)
        };

        {
            let mut meta = self.meta.lock();
            let cell = meta.view_port_time.entry(ts).or_default();
            for &id in impacted.all() {
                let weight = if viewport_ids.contains(&id) { duration } else { 0 };
                cell.insert(id, weight);
            }
        }

        Ok((ts, impacted))
    }

    /// Install a concrete version and release the corresponding outstanding
    /// placeholder count. Finishing a node with no matching placeholder is
    /// tolerated: the version is simply appended.
    pub fn finish_update(&self, node_id: NodeId, ts: i64, outcome: Outcome) -> Result<(), AceError> {
        let replaced_placeholder = self.view_graph.add_version(node_id, ts, outcome)?;
        debug_assert!(
            replaced_placeholder,
            "finish_update({node_id}, {ts}): no matching placeholder — protocol violation"
        );
        if !replaced_placeholder {
            tracing::warn!(node_id, ts, "finish_update had no matching placeholder");
        }
        let mut global = self.global.lock();
        if let Some(count) = global.num_ivs.get_mut(&ts) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    /// Rejects a `ts` the state manager never allocated — a commit past
    /// `cur_ts` indicates a scheduler bug rather than a benign race, so it is
    /// asserted against in debug builds and surfaced as a typed error in
    /// release builds.
    pub fn commit_txn(&self, ts: i64) -> Result<(), AceError> {
        let mut global = self.global.lock();
        debug_assert!(
            ts <= global.cur_ts,
            "commit_txn({ts}): no such ts was ever submitted (cur_ts={})",
            global.cur_ts
        );
        if ts > global.cur_ts {
            return Err(AceError::ProtocolViolation(format!(
                "commit_txn: ts {ts} was never submitted (cur_ts={})",
                global.cur_ts
            )));
        }
        if ts > global.last_committed {
            global.last_committed = ts;
        }
        Ok(())
    }

    /// Read path: snapshot selection per the configured policy, followed by
    /// the last-read idempotence filter.
    pub fn read_viewport(
        &self,
        node_ids: &HashSet<NodeId>,
        duration: u64,
    ) -> Result<ReadResult, AceError> {
        let config = self.config_snapshot();
        let (last_committed, last_submitted) = {
            let global = self.global.lock();
            (global.last_committed, global.last_submitted)
        };

        {
            let mut meta = self.meta.lock();
            for ts_active in (last_committed + 1)..=last_submitted {
                if let Some(cell) = meta.view_port_time.get_mut(&ts_active) {
                    for &id in node_ids {
                        if let Some(v) = cell.get_mut(&id) {
                            *v += duration;
                        }
                    }
                }
            }
            for &id in node_ids {
                *meta.node_metrics.entry(id).or_insert(0) += duration;
            }
        }

        let candidate = self.select_snapshot(
            config.policy,
            config.k_relaxed,
            last_committed,
            last_submitted,
            node_ids,
        )?;

        let filtered = self.update_last_read(candidate);

        Ok(ReadResult {
            ts: last_committed,
            snapshot: filtered,
        })
    }

    fn select_snapshot(
        &self,
        policy: PolicyTag,
        k: u32,
        last_committed: i64,
        last_submitted: i64,
        node_ids: &HashSet<NodeId>,
    ) -> Result<HashMap<NodeId, Entry>, AceError> {
        match policy {
            PolicyTag::Icnb => {
                let raw = self.view_graph.read_visible_versions(node_ids)?;
                Ok(flatten(raw))
            }
            PolicyTag::Gcpb => {
                let raw = self.view_graph.read_snapshot(last_submitted, node_ids)?;
                Ok(flatten(raw))
            }
            PolicyTag::Gcnb => {
                let ts_to_read = {
                    let global = self.global.lock();
                    let mut chosen = last_committed;
                    let mut ts = last_submitted;
                    while ts > last_committed {
                        if *global.num_ivs.get(&ts).unwrap_or(&0) <= k {
                            chosen = ts;
                            break;
                        }
                        ts -= 1;
                    }
                    chosen
                };
                let raw = self.view_graph.read_snapshot(ts_to_read, node_ids)?;
                Ok(flatten(raw))
            }
            PolicyTag::Cmva => {
                let mut best: Option<(i64, HashMap<NodeId, Entry>)> = None;
                for ts in last_committed..=last_submitted {
                    let raw = self.view_graph.read_snapshot(ts, node_ids)?;
                    let snap = flatten(raw);
                    let iv = count_placeholders(&snap);
                    if iv as u32 <= k && best.as_ref().map_or(true, |(b_ts, _)| ts >= *b_ts) {
                        best = Some((ts, snap));
                    }
                }
                Ok(best.map(|(_, s)| s).unwrap_or_default())
            }
            PolicyTag::Lcmb => {
                let ts_lower = {
                    let last_read = self.last_read.lock();
                    node_ids
                        .iter()
                        .filter_map(|id| last_read.get(id))
                        .map(|e| e.ts())
                        .max()
                        .map(|ts| ts.max(START_TS))
                        .unwrap_or(START_TS)
                };
                let mut snapshots = Vec::new();
                for ts in ts_lower..=last_submitted {
                    let raw = self.view_graph.read_snapshot(ts, node_ids)?;
                    let snap = flatten(raw);
                    let iv = count_placeholders(&snap);
                    snapshots.push((ts, iv, snap));
                }
                let min_iv = snapshots.iter().map(|(_, iv, _)| *iv).min().unwrap_or(0);
                let mut best: Option<(i64, HashMap<NodeId, Entry>)> = None;
                for (ts, iv, snap) in snapshots {
                    if iv <= min_iv + k as usize
                        && best.as_ref().map_or(true, |(b_ts, _)| ts >= *b_ts)
                    {
                        best = Some((ts, snap));
                    }
                }
                Ok(best.map(|(_, s)| s).unwrap_or_default())
            }
        }
    }

    /// Suppresses entries identical to what this reader last saw; always
    /// advances the store regardless of suppression.
    fn update_last_read(&self, snapshot: HashMap<NodeId, Entry>) -> HashMap<NodeId, Entry> {
        let mut last_read = self.last_read.lock();
        let mut emitted = HashMap::new();
        for (id, new_entry) in snapshot {
            let emit = match last_read.get(&id) {
                None => true,
                Some(old) if old.ts() != new_entry.ts() => true,
                Some(old) if old.is_placeholder() && !new_entry.is_placeholder() => true,
                _ => false,
            };
            if emit {
                emitted.insert(id, new_entry.clone());
            }
            last_read.insert(id, new_entry);
        }
        emitted
    }

    /// Scheduler priority function: picks which candidate node to recompute
    /// next.
    pub fn top_priority(
        &self,
        ts: i64,
        candidates: &HashSet<NodeId>,
        cost: &HashMap<NodeId, i64>,
        rng: &mut impl Rng,
    ) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let config = self.config_snapshot();

        if config.opt_metrics {
            let meta = self.meta.lock();
            let mut max_metric: Option<u64> = None;
            let mut tied: Vec<NodeId> = Vec::new();
            let mut any_metric = false;
            for &id in candidates {
                if let Some(&m) = meta.node_metrics.get(&id) {
                    any_metric = true;
                    if max_metric.map_or(true, |cur| m > cur) {
                        max_metric = Some(m);
                        tied.clear();
                        tied.push(id);
                    } else if Some(m) == max_metric {
                        tied.push(id);
                    }
                }
            }
            drop(meta);
            if any_metric && !tied.is_empty() {
                let idx = rng.gen_range(0..tied.len());
                return Some(tied[idx]);
            }
            let all: Vec<NodeId> = candidates.iter().copied().collect();
            return Some(all[rng.gen_range(0..all.len())]);
        }

        if !config.opt_viewport && !config.opt_exec_time {
            let all: Vec<NodeId> = candidates.iter().copied().collect();
            return Some(all[rng.gen_range(0..all.len())]);
        }

        let meta = self.meta.lock();
        let view_times = meta.view_port_time.get(&ts);
        let mut best: Option<(NodeId, f64)> = None;
        for &id in candidates {
            let view_time = if config.opt_viewport {
                view_times.and_then(|m| m.get(&id)).copied().unwrap_or(1) as f64
            } else {
                1.0
            };
            let exec_cost = if config.opt_exec_time {
                cost.get(&id).copied().unwrap_or(1).max(1) as f64
            } else {
                1.0
            };
            let priority = view_time / exec_cost;
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((id, priority));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Component E: collapse every node's version list and drop bookkeeping
    /// for timestamps already committed past.
    pub fn clean_unused_versions(&self) {
        let last_submitted = self.last_submitted();
        self.view_graph.clean_unused_versions(last_submitted);

        let last_committed = self.last_committed();
        let mut global = self.global.lock();
        global.num_ivs.retain(|&ts, _| ts >= last_committed);
        drop(global);
        let mut meta = self.meta.lock();
        meta.view_port_time.retain(|&ts, _| ts >= last_committed);
    }
}

fn flatten(raw: HashMap<NodeId, Option<Entry>>) -> HashMap<NodeId, Entry> {
    raw.into_iter()
        .filter_map(|(id, entry)| entry.map(|e| (id, e)))
        .collect()
}

fn count_placeholders(snapshot: &HashMap<NodeId, Entry>) -> usize {
    snapshot.values().filter(|e| e.is_placeholder()).count()
}
