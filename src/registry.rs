//! Registry (component F): per-dashboard (state manager, scheduler)
//! instances keyed by dashboard id. Grounded in the same
//! `RwLock<HashMap<Id, T>>` shape used elsewhere in this codebase's lineage
//! for keeping a thread-safe table of long-lived per-entity state.

use crate::config::{SchedulerConfig, StateManagerConfig};
use crate::error::AceError;
use crate::external::{ComputeFn, EstimateFn};
use crate::scheduler::Scheduler;
use crate::state_manager::StateManager;
use crate::view_graph::Dependency;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A dashboard's live engine state: the consistency core plus its worker.
pub struct Dashboard {
    pub state: Arc<StateManager>,
    pub scheduler: Arc<Scheduler>,
}

/// Thread-safe table of active dashboards.
pub struct Registry {
    dashboards: RwLock<HashMap<u64, Arc<Dashboard>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            dashboards: RwLock::new(HashMap::new()),
        }
    }

    /// `create_state(dash_id, dependencies)`: initializes the state manager
    /// (installing the initial sentinel snapshot) and spawns its scheduler.
    pub fn create_state(
        &self,
        dash_id: u64,
        dependencies: Vec<Dependency>,
        compute: Arc<dyn ComputeFn>,
        estimate: Arc<dyn EstimateFn>,
        scheduler_config: SchedulerConfig,
    ) -> Result<(), AceError> {
        let mut dashboards = self.dashboards.write();
        if dashboards.contains_key(&dash_id) {
            return Err(AceError::DuplicateDashboard(dash_id));
        }

        let state = Arc::new(StateManager::new(dependencies)?);
        let scheduler = Arc::new(Scheduler::spawn(
            dash_id,
            state.clone(),
            compute,
            estimate,
            scheduler_config.queue_capacity,
            scheduler_config.recv_timeout,
            None,
        ));

        tracing::info!(dash_id, "dashboard state created");
        dashboards.insert(dash_id, Arc::new(Dashboard { state, scheduler }));
        Ok(())
    }

    /// `config(dash_id, ...)`: reconfigures an existing dashboard in place.
    pub fn config(&self, dash_id: u64, config: StateManagerConfig) -> Result<(), AceError> {
        let dashboard = self.get(dash_id)?;
        dashboard.state.configure(config);
        tracing::info!(dash_id, "dashboard reconfigured");
        Ok(())
    }

    pub fn get(&self, dash_id: u64) -> Result<Arc<Dashboard>, AceError> {
        self.dashboards
            .read()
            .get(&dash_id)
            .cloned()
            .ok_or(AceError::UnknownDashboard(dash_id))
    }

    /// `delete_state(dash_id)`: cooperative scheduler shutdown, then drop.
    pub fn delete_state(&self, dash_id: u64) -> Result<(), AceError> {
        let dashboard = {
            let mut dashboards = self.dashboards.write();
            dashboards
                .remove(&dash_id)
                .ok_or(AceError::UnknownDashboard(dash_id))?
        };
        dashboard.scheduler.shutdown();
        tracing::info!(dash_id, "dashboard state deleted");
        Ok(())
    }

    pub fn contains(&self, dash_id: u64) -> bool {
        self.dashboards.read().contains_key(&dash_id)
    }

    pub fn len(&self) -> usize {
        self.dashboards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
