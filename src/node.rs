//! Versioned node store (component A).
//!
//! A [`Node`] holds an ordered, per-node list of entries — either a
//! [`Placeholder`](Entry::Placeholder) reserving a timestamp for work in
//! flight, or a [`Version`](Entry::Version) holding a concrete compute
//! outcome. Mutation is serialized by a local lock so that graph-wide
//! operations never need to hold more than one node lock at a time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identity. Dashboards assign these; the engine treats them opaquely.
pub type NodeId = i64;

/// Sentinel timestamp before any refresh has been submitted.
pub const START_TS: i64 = -1;

/// The three node kinds along the compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    BaseTable,
    Filter,
    Viz,
}

/// A concrete compute outcome: a status code and an opaque result payload.
///
/// Mirrors the tagged-union shape recommended for serialization — the
/// reserved `"IV"` string only appears at the [`crate::external::read_charts`]
/// boundary, never inside the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outcome {
    pub code: u16,
    pub result: serde_json::Value,
}

impl Outcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Outcome { code: 200, result }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Outcome {
            code,
            result: serde_json::Value::String(message.into()),
        }
    }
}

/// One entry in a node's version list.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A reservation at `ts`; the compute outcome has not landed yet.
    Placeholder { ts: i64 },
    /// A concrete outcome installed at `ts`.
    Version { ts: i64, outcome: Outcome },
}

impl Entry {
    pub fn ts(&self) -> i64 {
        match self {
            Entry::Placeholder { ts } => *ts,
            Entry::Version { ts, .. } => *ts,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Entry::Placeholder { .. })
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Placeholder { ts } => write!(f, "Placeholder(ts={ts})"),
            Entry::Version { ts, outcome } => {
                write!(f, "Version(ts={ts}, code={})", outcome.code)
            }
        }
    }
}

/// A single versioned node. Entries are not kept globally sorted; all
/// queries below compute min/max explicitly rather than relying on order.
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    entries: Mutex<Vec<Entry>>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Node {
            id,
            kind,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append a placeholder at `ts`. Callers must not double-add for the
    /// same `ts` — idempotence is not guaranteed; one caller owns each ts,
    /// enforced upstream by the global timestamp lock.
    pub fn add_placeholder(&self, ts: i64) {
        self.entries.lock().push(Entry::Placeholder { ts });
    }

    /// Install a concrete version at `ts`, replacing a matching placeholder
    /// in place if one exists, otherwise appending. Returns `true` when a
    /// placeholder was replaced, `false` when the version was appended fresh
    /// — the latter is a "finish without a matching placeholder" protocol
    /// anomaly, tolerated here but reported to the caller so it can log or
    /// assert on it.
    pub fn add_version(&self, ts: i64, outcome: Outcome) -> bool {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries
            .iter()
            .position(|e| e.is_placeholder() && e.ts() == ts)
        {
            entries[slot] = Entry::Version { ts, outcome };
            true
        } else {
            entries.push(Entry::Version { ts, outcome });
            false
        }
    }

    /// The entry with the largest `ts` not exceeding `ts`, or `None`.
    pub fn get_by_snapshot(&self, ts: i64) -> Option<Entry> {
        let entries = self.entries.lock();
        let mut best: Option<&Entry> = None;
        for e in entries.iter() {
            if e.ts() <= ts {
                if best.map_or(true, |b| e.ts() > b.ts()) {
                    best = Some(e);
                }
            }
        }
        best.cloned()
    }

    /// The latest concrete [`Entry::Version`], skipping placeholders.
    pub fn get_visible(&self) -> Option<Entry> {
        let entries = self.entries.lock();
        let mut best: Option<&Entry> = None;
        for e in entries.iter() {
            if !e.is_placeholder() && best.map_or(true, |b| e.ts() > b.ts()) {
                best = Some(e);
            }
        }
        best.cloned()
    }

    /// Collapse the version list down to the single entry with the largest
    /// `ts` not exceeding `ts`: everything strictly newer *and* everything
    /// strictly older is dropped. This is the confirmed-intentional contract,
    /// not a partial GC that keeps history.
    pub fn prune(&self, ts: i64) {
        let mut entries = self.entries.lock();
        let lower = entries
            .iter()
            .filter(|e| e.ts() <= ts)
            .map(|e| e.ts())
            .max();
        match lower {
            Some(lower) => entries.retain(|e| e.ts() == lower),
            None => entries.clear(),
        }
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}
