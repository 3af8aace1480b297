//! ACE - dashboard consistency engine.
//!
//! Coordinates concurrent dashboard refreshes against concurrent viewport
//! reads over a versioned dependency graph, offering a choice of read
//! -consistency policies and a cost/attention-weighted refresh scheduler.

pub mod config;
pub mod error;
pub mod external;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod state_manager;
pub mod view_graph;

pub use config::{PolicyTag, SchedulerConfig, StateManagerConfig};
pub use error::AceError;
pub use external::{
    config as configure_dashboard, create_state, delete_state, read_charts, submit_refresh,
    ChartSnapshot, ComputeFn, EstimateFn, ReadChartsResponse,
};
pub use node::{Entry, NodeId, NodeKind, Outcome};
pub use registry::{Dashboard, Registry};
pub use scheduler::{RefreshJob, Scheduler};
pub use state_manager::{ReadResult, StateManager};
pub use view_graph::{Dependency, ImpactedSet, ViewGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
