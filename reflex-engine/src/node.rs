//! Computed nodes: one cached result plus its consistency state and
//! dependency edges.
//!
//! Nodes live in an arena owned by the cache and reference each other by
//! [`NodeId`]. Dependency edges (what this node read) are owned by the
//! node; dependent edges (who read this node) are plain ids with a
//! liveness check, pruned opportunistically during invalidation traversal,
//! so the graph cannot leak by mutual retention.

use reflex_core::{CallKey, NodeState, ReflexError};
use std::any::Any;
use std::collections::HashSet;
use std::sync::RwLock;

/// Arena slot id of a computed node. Acts as a weak reference: holding a
/// `NodeId` keeps nothing alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

/// Type-erased cached value.
pub(crate) type AnyValue = std::sync::Arc<dyn Any + Send + Sync>;

/// Mutable core of a node, guarded by a sync lock (never held across an
/// await point).
#[derive(Debug)]
pub(crate) struct NodeCore {
    pub state: NodeState,
    pub value: Option<AnyValue>,
    pub error: Option<ReflexError>,
    /// Monotonic counter, bumped on every successful evaluation.
    pub version: u64,
    /// Nodes read during this node's own (latest) evaluation.
    pub dependencies: HashSet<NodeId>,
    /// Back-references: nodes whose latest evaluation read this one.
    pub dependents: HashSet<NodeId>,
    /// Set when an invalidation arrives while an evaluation is in flight;
    /// the finishing evaluation then lands as `Invalidated` instead of
    /// `Consistent` so the write is not lost.
    pub dirtied: bool,
}

impl NodeCore {
    fn new() -> Self {
        Self {
            state: NodeState::Invalidated,
            value: None,
            error: None,
            version: 0,
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
            dirtied: false,
        }
    }
}

/// A computed node entry in the arena.
#[derive(Debug)]
pub struct NodeEntry {
    pub(crate) id: NodeId,
    pub(crate) key: CallKey,
    pub(crate) core: RwLock<NodeCore>,
    /// Per-key evaluation slot: at most one evaluation in flight per key.
    /// Held across await points, hence an async mutex.
    pub(crate) eval_lock: tokio::sync::Mutex<()>,
}

impl NodeEntry {
    pub(crate) fn new(id: NodeId, key: CallKey) -> Self {
        Self {
            id,
            key,
            core: RwLock::new(NodeCore::new()),
            eval_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Arena id of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Call key this node caches.
    pub fn key(&self) -> &CallKey {
        &self.key
    }

    /// Current consistency state (atomic check, no evaluation).
    pub fn state(&self) -> NodeState {
        self.read().state
    }

    /// Current version; bumps on every successful evaluation.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Last evaluation error, if the node is in a failed terminal state.
    pub fn error(&self) -> Option<ReflexError> {
        self.read().error.clone()
    }

    pub(crate) fn read(&self) -> std::sync::RwLockReadGuard<'_, NodeCore> {
        self.core.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write(&self) -> std::sync::RwLockWriteGuard<'_, NodeCore> {
        self.core.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Restores a node that was left mid-evaluation (caller cancelled, future
/// dropped) back to `Invalidated`, so cancellation never poisons the node
/// and the next caller simply retries.
pub(crate) struct EvalGuard<'a> {
    entry: &'a NodeEntry,
    defused: bool,
}

impl<'a> EvalGuard<'a> {
    pub(crate) fn arm(entry: &'a NodeEntry) -> Self {
        entry.write().state = NodeState::Computing;
        Self {
            entry,
            defused: false,
        }
    }

    /// The evaluation completed (either way); the guard must not touch the
    /// node anymore.
    pub(crate) fn defuse(mut self) {
        self.defused = true;
    }
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        if !self.defused {
            let mut core = self.entry.write();
            if core.state == NodeState::Computing {
                core.state = NodeState::Invalidated;
                core.dirtied = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::ArgValue;

    fn entry() -> NodeEntry {
        NodeEntry::new(NodeId(1), CallKey::new("svc", "m", vec![ArgValue::Null]))
    }

    #[test]
    fn test_new_node_starts_invalidated() {
        let node = entry();
        assert_eq!(node.state(), NodeState::Invalidated);
        assert_eq!(node.version(), 0);
        assert!(node.error().is_none());
    }

    #[test]
    fn test_eval_guard_restores_on_drop() {
        let node = entry();
        {
            let _guard = EvalGuard::arm(&node);
            assert_eq!(node.state(), NodeState::Computing);
        }
        assert_eq!(node.state(), NodeState::Invalidated);
    }

    #[test]
    fn test_defused_guard_leaves_state_alone() {
        let node = entry();
        let guard = EvalGuard::arm(&node);
        node.write().state = NodeState::Consistent;
        guard.defuse();
        assert_eq!(node.state(), NodeState::Consistent);
    }
}
