//! Consistency states, live statuses and dispatch descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Consistency state of a computed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// An evaluation for this node is currently in flight.
    Computing,
    /// The cached value is consistent: every dependency is itself
    /// consistent and was read under the value currently cached.
    Consistent,
    /// The node (or one of its dependencies) has been invalidated; the
    /// next read re-evaluates.
    Invalidated,
}

/// UI-facing status of a live subscription.
///
/// Mirrors the lifecycle: `Loading` (never updated) -> `Updating`
/// (evaluation in flight) -> `InSync` / `UpdatePending` -> `Updating`
/// again, cyclically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStatus {
    /// No successful update has completed yet.
    Loading,
    /// An evaluation is in flight.
    Updating,
    /// A consistent value exists but its node has been invalidated; a
    /// delayed refresh is pending.
    UpdatePending,
    /// Consistent, no pending invalidation.
    InSync,
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiveStatus::Loading => "loading",
            LiveStatus::Updating => "updating",
            LiveStatus::UpdatePending => "update-pending",
            LiveStatus::InSync => "in-sync",
        };
        write!(f, "{s}")
    }
}

/// Registry key addressing a command to exactly one handler.
///
/// Handlers are registered explicitly at startup against a descriptor;
/// there is no attribute or reflection-based scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandDescriptor {
    /// Owning service, e.g. `"todo"`.
    pub service: &'static str,
    /// Command method, e.g. `"add_or_update"`.
    pub method: &'static str,
}

impl CommandDescriptor {
    pub const fn new(service: &'static str, method: &'static str) -> Self {
        Self { service, method }
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.service, self.method)
    }
}

/// Which logical pass of a command handler is executing.
///
/// A handler runs twice per dispatch: once to perform its effect and once
/// with `DeclareInvalidation` active, where cache reads do not evaluate
/// anything but instead mark the touched nodes stale. The same code path
/// declares its own blast radius by re-walking its own key accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Real pass: perform the mutation and produce a value.
    Execute,
    /// Marker pass: identify which cached calls to invalidate.
    DeclareInvalidation,
}

impl Phase {
    /// Whether the invalidation marker is active.
    pub fn is_invalidating(&self) -> bool {
        matches!(self, Phase::DeclareInvalidation)
    }
}
