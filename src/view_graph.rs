//! Dependency graph (component B): precedent -> dependent adjacency and
//! BFS impact computation over the versioned node store.

use crate::error::AceError;
use crate::node::{Entry, Node, NodeId, NodeKind, Outcome, START_TS};
use std::collections::{HashMap, HashSet, VecDeque};

/// An ordered (precedent, dependent) pair. Precedents are BASE_TABLE or
/// FILTER; dependents are FILTER or VIZ.
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub prec: NodeId,
    pub prec_kind: NodeKind,
    pub dep: NodeId,
    pub dep_kind: NodeKind,
}

/// Nodes reached by a BFS, partitioned by kind.
pub struct ImpactedSet {
    pub base_tables: HashSet<NodeId>,
    pub filters: HashSet<NodeId>,
    pub viz: HashSet<NodeId>,
}

impl ImpactedSet {
    pub fn all(&self) -> impl Iterator<Item = &NodeId> {
        self.base_tables
            .iter()
            .chain(self.filters.iter())
            .chain(self.viz.iter())
    }
}

/// The versioned dependency graph. Owns every [`Node`] and the
/// precedent -> dependents adjacency used for BFS impact computation.
pub struct ViewGraph {
    nodes: HashMap<NodeId, Node>,
    prec_to_dep: HashMap<NodeId, Vec<NodeId>>,
}

impl ViewGraph {
    pub fn new() -> Self {
        ViewGraph {
            nodes: HashMap::new(),
            prec_to_dep: HashMap::new(),
        }
    }

    fn ensure_node(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes.entry(id).or_insert_with(|| Node::new(id, kind));
    }

    /// Insert a dependency edge, creating either endpoint's node if new.
    /// Rejects edges whose kinds violate the BASE_TABLE/FILTER -> FILTER/VIZ
    /// layering, and edges that would close a cycle.
    pub fn insert(&mut self, dependency: Dependency) -> Result<(), AceError> {
        let valid_prec = matches!(dependency.prec_kind, NodeKind::BaseTable | NodeKind::Filter);
        let valid_dep = matches!(dependency.dep_kind, NodeKind::Filter | NodeKind::Viz);
        if !valid_prec || !valid_dep {
            return Err(AceError::InvalidDependencyKind {
                prec: dependency.prec,
                prec_kind: dependency.prec_kind,
                dep: dependency.dep,
                dep_kind: dependency.dep_kind,
            });
        }

        self.ensure_node(dependency.prec, dependency.prec_kind);
        self.ensure_node(dependency.dep, dependency.dep_kind);

        if self.reaches(dependency.dep, dependency.prec) {
            return Err(AceError::CyclicDependency {
                prec: dependency.prec,
                dep: dependency.dep,
            });
        }

        self.prec_to_dep
            .entry(dependency.prec)
            .or_default()
            .push(dependency.dep);
        Ok(())
    }

    /// True if `from` can reach `to` by following existing precedent -> dependent
    /// edges. Used to reject inserts that would close a cycle.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            if cur == to {
                return true;
            }
            if !seen.insert(cur) {
                continue;
            }
            if let Some(deps) = self.prec_to_dep.get(&cur) {
                queue.extend(deps.iter().copied());
            }
        }
        false
    }

    /// Install a sentinel "not initialized" Version at `ts` on every node.
    pub fn create_initial_snapshot(&self, ts: i64) {
        for node in self.nodes.values() {
            let outcome = Outcome::error(400, "Not initialized yet");
            node.add_version(ts, outcome);
        }
    }

    /// BFS from `seed_ids` along precedent -> dependent edges. BASE_TABLE and
    /// FILTER nodes get an instantaneous Version(ts, 200, "Done"); VIZ nodes
    /// get a Placeholder awaiting scheduler-driven recompute. Each node is
    /// visited at most once.
    pub fn create_snapshot_placeholder(
        &self,
        seed_ids: &HashSet<NodeId>,
        ts: i64,
    ) -> Result<ImpactedSet, AceError> {
        let mut impacted = HashSet::new();
        let mut base_tables = HashSet::new();
        let mut filters = HashSet::new();
        let mut viz = HashSet::new();

        let mut queue: VecDeque<NodeId> = seed_ids.iter().copied().collect();

        while let Some(cur_id) = queue.pop_front() {
            if !impacted.insert(cur_id) {
                continue;
            }
            let node = self.nodes.get(&cur_id).ok_or(AceError::UnknownNode(cur_id))?;

            match node.kind {
                NodeKind::BaseTable => {
                    node.add_version(ts, Outcome::ok(serde_json::json!("Done")));
                    base_tables.insert(cur_id);
                }
                NodeKind::Filter => {
                    node.add_version(ts, Outcome::ok(serde_json::json!("Done")));
                    filters.insert(cur_id);
                }
                NodeKind::Viz => {
                    node.add_placeholder(ts);
                    viz.insert(cur_id);
                }
            }

            if let Some(deps) = self.prec_to_dep.get(&cur_id) {
                for &dep_id in deps {
                    if !impacted.contains(&dep_id) {
                        queue.push_back(dep_id);
                    }
                }
            }
        }

        Ok(ImpactedSet {
            base_tables,
            filters,
            viz,
        })
    }

    /// Per-node: the entry with the largest ts <= `ts`.
    pub fn read_snapshot(
        &self,
        ts: i64,
        node_ids: &HashSet<NodeId>,
    ) -> Result<HashMap<NodeId, Option<Entry>>, AceError> {
        let mut snapshot = HashMap::new();
        for &id in node_ids {
            let node = self.nodes.get(&id).ok_or(AceError::UnknownNode(id))?;
            snapshot.insert(id, node.get_by_snapshot(ts));
        }
        Ok(snapshot)
    }

    /// Per-node: the latest concrete Version, skipping placeholders.
    pub fn read_visible_versions(
        &self,
        node_ids: &HashSet<NodeId>,
    ) -> Result<HashMap<NodeId, Option<Entry>>, AceError> {
        let mut snapshot = HashMap::new();
        for &id in node_ids {
            let node = self.nodes.get(&id).ok_or(AceError::UnknownNode(id))?;
            snapshot.insert(id, node.get_visible());
        }
        Ok(snapshot)
    }

    /// Returns whether a placeholder was replaced (`true`) or the version
    /// was appended fresh (`false`) — see [`Node::add_version`].
    pub fn add_version(&self, node_id: NodeId, ts: i64, outcome: Outcome) -> Result<bool, AceError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(AceError::UnknownNode(node_id))?;
        Ok(node.add_version(ts, outcome))
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn kind_of(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(|n| n.kind)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Prune every node down to its entry at or below `ts` (see
    /// [`Node::prune`]); this is the GC sweep (component E).
    pub fn clean_unused_versions(&self, ts: i64) {
        for node in self.nodes.values() {
            node.prune(ts);
        }
    }
}

impl Default for ViewGraph {
    fn default() -> Self {
        Self::new()
    }
}

pub const INITIAL_TS: i64 = START_TS;

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chain() -> ViewGraph {
        let mut graph = ViewGraph::new();
        graph
            .insert(Dependency {
                prec: 1,
                prec_kind: NodeKind::BaseTable,
                dep: 2,
                dep_kind: NodeKind::Filter,
            })
            .unwrap();
        graph
            .insert(Dependency {
                prec: 2,
                prec_kind: NodeKind::Filter,
                dep: 3,
                dep_kind: NodeKind::Viz,
            })
            .unwrap();
        graph
    }

    #[test]
    fn bfs_closure_matches_reachable_set() {
        let graph = linear_chain();
        let seeds: HashSet<NodeId> = [1].into_iter().collect();
        let impacted = graph.create_snapshot_placeholder(&seeds, 0).unwrap();
        assert_eq!(impacted.base_tables, [1].into_iter().collect());
        assert_eq!(impacted.filters, [2].into_iter().collect());
        assert_eq!(impacted.viz, [3].into_iter().collect());
    }

    #[test]
    fn viz_nodes_get_placeholders_not_versions() {
        let graph = linear_chain();
        let seeds: HashSet<NodeId> = [1].into_iter().collect();
        graph.create_snapshot_placeholder(&seeds, 0).unwrap();
        let snap = graph
            .read_snapshot(0, &[3].into_iter().collect())
            .unwrap();
        assert!(snap[&3].as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn cyclic_insert_is_rejected() {
        let mut graph = linear_chain();
        let err = graph.insert(Dependency {
            prec: 3,
            prec_kind: NodeKind::Filter,
            dep: 1,
            dep_kind: NodeKind::Viz,
        });
        assert!(err.is_err());
    }

    #[test]
    fn invalid_kind_layering_rejected() {
        let mut graph = ViewGraph::new();
        let err = graph.insert(Dependency {
            prec: 1,
            prec_kind: NodeKind::Viz,
            dep: 2,
            dep_kind: NodeKind::BaseTable,
        });
        assert!(err.is_err());
    }

    #[test]
    fn initial_snapshot_is_sentinel_error() {
        let graph = linear_chain();
        graph.create_initial_snapshot(START_TS);
        let snap = graph
            .read_visible_versions(&[3].into_iter().collect())
            .unwrap();
        let entry = snap[&3].as_ref().unwrap();
        assert_eq!(entry.ts(), START_TS);
    }
}
