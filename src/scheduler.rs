//! Refresh scheduler (component D): one worker thread per dashboard,
//! draining a bounded FIFO queue of refresh jobs, ordering node
//! recomputation by attention/cost priority, and committing once a
//! transaction's dependency closure finishes.

use crate::external::{ComputeFn, EstimateFn};
use crate::node::NodeId;
use crate::state_manager::StateManager;
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One pending write transaction: the set of VIZ nodes to recompute and the
/// form data each needs, keyed by node id.
pub struct RefreshJob {
    pub ts: i64,
    pub viz_ids: HashSet<NodeId>,
    pub form_data: HashMap<NodeId, serde_json::Value>,
}

struct QueueInner {
    jobs: VecDeque<RefreshJob>,
}

/// Per-dashboard worker. Cloning is cheap (shares the queue by `Arc`); the
/// handle returned by [`Scheduler::spawn`] owns the worker thread's join
/// handle and must be shut down via [`Scheduler::shutdown`].
pub struct Scheduler {
    dash_id: u64,
    queue: Arc<Mutex<QueueInner>>,
    cv: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
}

impl Scheduler {
    pub fn spawn(
        dash_id: u64,
        state: Arc<StateManager>,
        compute: Arc<dyn ComputeFn>,
        estimate: Arc<dyn EstimateFn>,
        capacity: usize,
        recv_timeout: Duration,
        rng_seed: Option<u64>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(QueueInner {
            jobs: VecDeque::new(),
        }));
        let cv = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_queue = queue.clone();
        let worker_cv = cv.clone();
        let worker_shutdown = shutdown.clone();
        let span = tracing::info_span!("scheduler", dash_id);
        let handle = std::thread::spawn(move || {
            let _enter = span.enter();
            tracing::info!("scheduler worker started");
            worker_loop(
                worker_queue,
                worker_cv,
                worker_shutdown,
                state,
                compute,
                estimate,
                recv_timeout,
                rng_seed,
            );
            tracing::info!("scheduler worker stopped");
        });

        Scheduler {
            dash_id,
            queue,
            cv,
            shutdown,
            handle: Mutex::new(Some(handle)),
            capacity,
        }
    }

    /// Enqueue a job for the worker. Bounded: returns `Err` rather than
    /// blocking the caller forever once `capacity` pending jobs are queued.
    pub fn submit(&self, job: RefreshJob) -> Result<(), crate::error::AceError> {
        let mut q = self.queue.lock();
        if q.jobs.len() >= self.capacity {
            return Err(crate::error::AceError::QueueFull(self.dash_id));
        }
        q.jobs.push_back(job);
        drop(q);
        self.cv.notify_one();
        Ok(())
    }

    /// Cooperative shutdown: sets the stop flag, wakes the worker, and
    /// joins it. Jobs still queued after shutdown are dropped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.cv.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    queue: Arc<Mutex<QueueInner>>,
    cv: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    state: Arc<StateManager>,
    compute: Arc<dyn ComputeFn>,
    estimate: Arc<dyn EstimateFn>,
    recv_timeout: Duration,
    rng_seed: Option<u64>,
) {
    let mut rng = match rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut finished_ts: HashSet<i64> = HashSet::new();
    let mut dependent_ts: HashMap<i64, Instant> = HashMap::new();

    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        let job = {
            let mut q = queue.lock();
            if q.jobs.is_empty() {
                cv.wait_for(&mut q, recv_timeout);
            }
            q.jobs.pop_front()
        };

        let Some(job) = job else {
            continue;
        };

        let ts = job.ts;
        let mut remaining: HashSet<NodeId> = job.viz_ids.clone();
        let config = state.config_snapshot();

        let cost = if config.opt_exec_time {
            estimate_costs(&estimate, &remaining, &job.form_data)
        } else {
            HashMap::new()
        };

        while !remaining.is_empty() {
            if config.opt_skip_write {
                skip_elided_writes(&queue, &mut remaining, &mut dependent_ts);
            }
            if remaining.is_empty() {
                break;
            }

            let Some(node_id) = state.top_priority(ts, &remaining, &cost, &mut rng) else {
                break;
            };

            let form_data = job
                .form_data
                .get(&node_id)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let outcome = compute.compute(&form_data);
            if outcome.code >= 400 {
                tracing::error!(node_id, code = outcome.code, "refresh compute failed");
            }
            if let Err(err) = state.finish_update(node_id, ts, outcome) {
                tracing::error!(node_id, ts, %err, "finish_update rejected");
            }
            remaining.remove(&node_id);
        }

        finished_ts.insert(ts);
        dependent_ts.insert(ts, Instant::now());

        apply_commit_watchdog(&mut dependent_ts, config.commit_watchdog_timeout);

        if dependent_ts.keys().all(|d| finished_ts.contains(d)) {
            if let Some(&max_ts) = finished_ts.iter().max() {
                if let Err(err) = state.commit_txn(max_ts) {
                    tracing::error!(ts = max_ts, %err, "commit_txn rejected");
                }
            }
            finished_ts.clear();
            dependent_ts.clear();
        }
    }
}

fn estimate_costs(
    estimate: &Arc<dyn EstimateFn>,
    viz_ids: &HashSet<NodeId>,
    form_data: &HashMap<NodeId, serde_json::Value>,
) -> HashMap<NodeId, i64> {
    let mut costs = HashMap::new();
    for &id in viz_ids {
        let Some(form) = form_data.get(&id) else {
            continue;
        };
        match estimate.estimate(form) {
            Ok(cost) => {
                costs.insert(id, cost);
            }
            Err(err) => {
                tracing::warn!(%err, "cost estimator failed, falling back to default costs");
                return HashMap::new();
            }
        }
    }
    costs
}

/// Skip-write elision: remove from `remaining` any node also targeted by a
/// still-queued job, recording that job's ts as a commit dependency.
fn skip_elided_writes(
    queue: &Arc<Mutex<QueueInner>>,
    remaining: &mut HashSet<NodeId>,
    dependent_ts: &mut HashMap<i64, Instant>,
) {
    let q = queue.lock();
    let mut absorbed = Vec::new();
    for pending in q.jobs.iter() {
        for &id in remaining.iter() {
            if pending.viz_ids.contains(&id) {
                absorbed.push(id);
                dependent_ts.entry(pending.ts).or_insert_with(Instant::now);
            }
        }
    }
    drop(q);
    for id in absorbed {
        remaining.remove(&id);
    }
}

/// A `dependent_ts` entry outstanding longer than `timeout` is treated as
/// abandoned so the closing job can still commit.
fn apply_commit_watchdog(dependent_ts: &mut HashMap<i64, Instant>, timeout: Duration) {
    let now = Instant::now();
    dependent_ts.retain(|ts, inserted_at| {
        let expired = now.duration_since(*inserted_at) > timeout;
        if expired {
            tracing::warn!(ts, "commit watchdog: abandoning missing predecessor");
        }
        !expired
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateManagerConfig;
    use crate::external::{ComputeFn, EstimateFn};
    use crate::node::{NodeKind, Outcome};
    use crate::view_graph::Dependency;
    use std::sync::atomic::AtomicUsize;

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

    fn make_state() -> Arc<StateManager> {
        let sm = StateManager::new(vec![
            Dependency {
                prec: 1,
                prec_kind: NodeKind::BaseTable,
                dep: 2,
                dep_kind: NodeKind::Filter,
            },
            Dependency {
                prec: 2,
                prec_kind: NodeKind::Filter,
                dep: 3,
                dep_kind: NodeKind::Viz,
            },
        ])
        .unwrap();
        sm.configure(StateManagerConfig::default());
        Arc::new(sm)
    }

    #[test]
    fn scheduler_processes_job_and_commits() {
        let state = make_state();
        let seeds: HashSet<NodeId> = [1].into_iter().collect();
        let viewport: HashSet<NodeId> = [3].into_iter().collect();
        let (ts, impacted) = state.submit_txn(&seeds, &viewport, 1).unwrap();

        let scheduler = Scheduler::spawn(
            1,
            state.clone(),
            Arc::new(EchoCompute),
            Arc::new(FixedEstimate),
            16,
            Duration::from_millis(10),
            Some(42),
        );

        let mut form_data = HashMap::new();
        for &id in &impacted.viz {
            form_data.insert(id, serde_json::json!({"id": id}));
        }
        scheduler
            .submit(RefreshJob {
                ts,
                viz_ids: impacted.viz.clone(),
                form_data,
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while state.last_committed() < ts && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(state.last_committed(), ts);
        scheduler.shutdown();
    }

    #[test]
    fn queue_rejects_once_full() {
        let _marker = AtomicUsize::new(0);
        let state = make_state();
        let scheduler = Scheduler::spawn(
            2,
            state.clone(),
            Arc::new(EchoCompute),
            Arc::new(FixedEstimate),
            0,
            Duration::from_millis(10),
            Some(7),
        );
        let err = scheduler.submit(RefreshJob {
            ts: 0,
            viz_ids: HashSet::new(),
            form_data: HashMap::new(),
        });
        assert!(err.is_err());
        scheduler.shutdown();
    }
}
