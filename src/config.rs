//! Per-dashboard configuration: the selectable read-consistency policy and
//! scheduler tuning knobs.

use std::time::Duration;

/// Selectable read-consistency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyTag {
    /// Incoherent, never-block: per-node latest visible Version.
    Icnb,
    /// Globally coherent, k-blocking.
    Gcnb,
    /// Locally coherent, monotonic, k-blocking.
    Lcmb,
    /// Globally coherent, progressive, blocking.
    Gcpb,
    /// Coherent, most-recent, k-allowed.
    Cmva,
}

/// Per-dashboard state manager configuration.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    pub policy: PolicyTag,
    pub k_relaxed: u32,
    pub opt_viewport: bool,
    pub opt_exec_time: bool,
    pub opt_metrics: bool,
    pub opt_skip_write: bool,
    /// How long an entry may sit in the scheduler's `dependent_ts` set
    /// before the commit watchdog treats it as abandoned.
    pub commit_watchdog_timeout: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        StateManagerConfig {
            policy: PolicyTag::Gcpb,
            k_relaxed: 0,
            opt_viewport: true,
            opt_exec_time: true,
            opt_metrics: true,
            opt_skip_write: true,
            commit_watchdog_timeout: Duration::from_secs(5),
        }
    }
}

impl StateManagerConfig {
    /// An empty connection string means there is no cost estimator to call,
    /// so exec-time weighting is forced off regardless of what the caller
    /// asked for.
    pub fn with_db_connect_info(mut self, db_connect_info: &str) -> Self {
        if db_connect_info.is_empty() {
            self.opt_exec_time = false;
        }
        self
    }
}

/// Per-dashboard scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    pub recv_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            queue_capacity: 256,
            recv_timeout: Duration::from_millis(50),
        }
    }
}
