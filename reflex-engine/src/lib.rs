//! Reactive computation engine for REFLEX.
//!
//! This crate is the heart of the system: a keyed cache of computed
//! values that tracks which computations read which other computations,
//! and uses those edges to invalidate transitively when underlying data
//! changes. Around the cache it provides:
//!
//! - [`ComputedCache`] — get-or-compute with single-flight evaluation,
//!   dependency capture and synchronous transitive invalidation
//! - [`EvalContext`] — explicit, passed-by-value evaluation scope (no
//!   thread-locals) that records dependency reads and carries the
//!   invalidation-pass marker for command handlers
//! - [`CommandDispatcher`] — two-phase write dispatch: execute, then
//!   re-walk the handler under the invalidation marker so every touched
//!   query goes stale before the call returns
//! - [`LiveState`] — standing subscriptions that debounce invalidation
//!   bursts through an [`UpdateDelayer`] and recompute automatically
//!
//! Reads observe either a fully consistent cached value or a freshly
//! evaluated one; a node invalidated mid-evaluation lands already stale
//! and is recomputed on the next read.

pub mod cache;
pub mod context;
pub mod delayer;
pub mod dispatcher;
pub mod live;
pub mod node;

pub use cache::ComputedCache;
pub use context::EvalContext;
pub use delayer::UpdateDelayer;
pub use dispatcher::{Command, CommandContext, CommandDispatcher, SessionResolver};
pub use live::{LiveSnapshot, LiveState};
pub use node::{NodeEntry, NodeId};

// Re-export the vocabulary types callers need alongside the engine.
pub use reflex_core::{
    ArgValue, CallKey, CommandDescriptor, EngineConfig, LiveStatus, NodeState, Phase, ReflexError,
    ReflexResult, Session, User,
};
