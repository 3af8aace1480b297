//! Error types for the consistency engine.
//!
//! Compute and estimator failures are not represented here — those are
//! captured inline as non-200 [`crate::node::Outcome`] values and never
//! unwind past the scheduler. `AceError` covers the remaining taxonomy:
//! precondition violations (bad dash_id, unknown node) and protocol
//! violations (double placeholder, commit of a nonexistent timestamp).

use crate::node::NodeId;

/// Errors surfaced by the external interface and registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AceError {
    /// No state manager/scheduler exists for this dashboard id.
    #[error("no dashboard state for dash_id {0}")]
    UnknownDashboard(u64),

    /// A dashboard state was created twice for the same id.
    #[error("dashboard state already exists for dash_id {0}")]
    DuplicateDashboard(u64),

    /// A read or write referenced a node id absent from the view graph.
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    /// Inserting a dependency would close a cycle in the view graph.
    #[error("dependency from {prec} to {dep} would introduce a cycle")]
    CyclicDependency { prec: NodeId, dep: NodeId },

    /// A dependency's node kinds violate the precedent/dependent layering.
    #[error("invalid dependency kind: {prec} ({prec_kind:?}) -> {dep} ({dep_kind:?})")]
    InvalidDependencyKind {
        prec: NodeId,
        prec_kind: crate::node::NodeKind,
        dep: NodeId,
        dep_kind: crate::node::NodeKind,
    },

    /// `finish_update` or `commit_txn` referenced a ts never submitted.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The bounded refresh queue was full; caller should retry or shed load.
    #[error("refresh queue for dash_id {0} is full")]
    QueueFull(u64),

    /// The cost estimator for a refresh job failed; carries a diagnostic only.
    #[error("cost estimation failed: {0}")]
    Estimate(String),
}
