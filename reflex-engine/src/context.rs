//! Computation contexts: ambient, per-evaluation scope that records which
//! nodes an in-flight computation reads.
//!
//! The context is an explicit value passed into every evaluator (no
//! thread-locals), so dependency capture is visible in function signatures
//! and testable without global state. It has two modes:
//!
//! - **Normal evaluation** (`Phase::Execute`): nested reads through
//!   [`EvalContext::compute`] are recorded as dependency edges.
//! - **Invalidation pass** (`Phase::DeclareInvalidation`): nested reads do
//!   not evaluate anything; the touched node is invalidated and a default
//!   value is returned, so a command handler declares its blast radius by
//!   re-walking the same key accesses its queries perform.

use crate::cache::ComputedCache;
use crate::node::NodeId;
use reflex_core::{ArgValue, CallKey, Phase, ReflexResult, Session};
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Ambient scope for one evaluation or one command pass.
#[derive(Clone)]
pub struct EvalContext {
    cache: Arc<ComputedCache>,
    session: Session,
    phase: Phase,
    /// Node currently being evaluated; `None` for command passes, which
    /// are not themselves cached.
    sink: Option<NodeId>,
    /// Nodes read so far by the evaluation this context belongs to.
    reads: Arc<Mutex<HashSet<NodeId>>>,
}

impl EvalContext {
    /// Context for evaluating one node.
    pub(crate) fn evaluation(cache: Arc<ComputedCache>, session: Session, sink: NodeId) -> Self {
        Self {
            cache,
            session,
            phase: Phase::Execute,
            sink: Some(sink),
            reads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Root context for top-level reads outside any evaluation or command.
    ///
    /// Reads through a root context evaluate and cache normally but are
    /// not recorded as anyone's dependency.
    pub fn root(cache: Arc<ComputedCache>, session: Session) -> Self {
        Self {
            cache,
            session,
            phase: Phase::Execute,
            sink: None,
            reads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Context for one pass of a command handler.
    pub(crate) fn command(cache: Arc<ComputedCache>, session: Session, phase: Phase) -> Self {
        Self {
            cache,
            session,
            phase,
            sink: None,
            reads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The session this evaluation runs under.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Which pass is executing.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the invalidation marker is active.
    pub fn is_invalidating(&self) -> bool {
        self.phase.is_invalidating()
    }

    /// The cache this context evaluates against.
    pub fn cache(&self) -> &Arc<ComputedCache> {
        &self.cache
    }

    /// Read a cached call, computing it if necessary.
    ///
    /// Under normal evaluation this records a dependency edge from the
    /// evaluating node to the read node. Under the invalidation marker the
    /// read is not a real query: the node for `key` is invalidated and
    /// `T::default()` is returned immediately.
    pub async fn compute<T, F, Fut>(&self, key: CallKey, evaluator: F) -> ReflexResult<Arc<T>>
    where
        T: Any + Default + Send + Sync,
        F: FnOnce(EvalContext) -> Fut,
        Fut: Future<Output = ReflexResult<T>> + Send,
    {
        if self.phase.is_invalidating() {
            self.cache.invalidate(&key);
            return Ok(Arc::new(T::default()));
        }

        let entry = self.cache.ensure_entry(&key);
        if self.sink.is_some() {
            self.record_read(entry.id());
        }
        self.cache.compute_entry(entry, &self.session, evaluator).await
    }

    /// Invalidate one cached call by key. No-op when nothing is cached.
    pub fn invalidate(&self, key: &CallKey) {
        self.cache.invalidate(key);
    }

    /// Invalidate every cached call of `service::method` whose leading
    /// arguments match.
    ///
    /// Used for footprints spanning arguments a handler cannot enumerate,
    /// such as every cached page of a listing for one session.
    pub fn invalidate_prefix(
        &self,
        service: &str,
        method: &str,
        leading_args: &[ArgValue],
    ) -> usize {
        self.cache.invalidate_prefix(service, method, leading_args)
    }

    pub(crate) fn record_read(&self, id: NodeId) {
        self.reads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
    }

    pub(crate) fn take_reads(&self) -> HashSet<NodeId> {
        std::mem::take(
            &mut *self
                .reads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}
