//! The computed cache: owns all nodes, exposes get-or-compute with
//! single-flight semantics, and push-propagates invalidation.
//!
//! Nodes live in an id-indexed arena keyed by [`CallKey`]. A node holds
//! its dependency set strongly and its dependents as plain ids, so the
//! graph cannot leak by mutual retention; stale dependent edges are pruned
//! while invalidation traverses them.

use crate::context::EvalContext;
use crate::node::{AnyValue, EvalGuard, NodeEntry, NodeId};
use reflex_core::{
    ArgValue, CallKey, EngineConfig, EvalError, NodeState, ReflexError, ReflexResult, Session,
};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Node arena: key index plus id-indexed slots.
#[derive(Debug, Default)]
struct Arena {
    by_key: HashMap<CallKey, NodeId>,
    nodes: HashMap<u64, Arc<NodeEntry>>,
    next_id: u64,
}

/// Reactive computation cache with dependency-based invalidation.
pub struct ComputedCache {
    arena: Mutex<Arena>,
    invalidations: broadcast::Sender<CallKey>,
    config: EngineConfig,
}

impl ComputedCache {
    /// Create a cache with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let (invalidations, _) = broadcast::channel(config.invalidation_channel_capacity);
        Self {
            arena: Mutex::new(Arena::default()),
            invalidations,
            config,
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// The engine configuration this cache runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to invalidated call keys. Live states use this to learn
    /// when their watched node went stale.
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<CallKey> {
        self.invalidations.subscribe()
    }

    /// Number of nodes currently in the arena.
    pub fn node_count(&self) -> usize {
        self.lock_arena().nodes.len()
    }

    /// Consistency state of the node cached for `key`, if any.
    pub fn node_state(&self, key: &CallKey) -> Option<NodeState> {
        self.entry_for(key).map(|e| e.state())
    }

    /// Version of the node cached for `key`, if any. Bumps on every
    /// successful evaluation.
    pub fn node_version(&self, key: &CallKey) -> Option<u64> {
        self.entry_for(key).map(|e| e.version())
    }

    /// Get a consistent cached value for `key`, or evaluate it.
    ///
    /// Guarantees at most one concurrent evaluation per key: concurrent
    /// callers for the same key await the in-flight evaluation and share
    /// its outcome, success or failure, rather than duplicating work.
    /// Errors are cached as the node's terminal state until the next
    /// invalidation.
    pub async fn get_or_compute<T, F, Fut>(
        self: &Arc<Self>,
        key: CallKey,
        session: &Session,
        evaluator: F,
    ) -> ReflexResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(EvalContext) -> Fut,
        Fut: Future<Output = ReflexResult<T>> + Send,
    {
        let entry = self.ensure_entry(&key);
        self.compute_entry(entry, session, evaluator).await
    }

    /// Invalidate the node cached for `key` and, transitively, every live
    /// dependent. Synchronous: completed before this returns. Invalidating
    /// a key with no cached node is a no-op.
    pub fn invalidate(&self, key: &CallKey) {
        if let Some(entry) = self.entry_for(key) {
            self.invalidate_entry(&entry);
        }
    }

    /// Invalidate every cached call of `service::method` whose leading
    /// arguments match. Returns the number of nodes targeted.
    pub fn invalidate_prefix(
        &self,
        service: &str,
        method: &str,
        leading_args: &[ArgValue],
    ) -> usize {
        let matches: Vec<Arc<NodeEntry>> = {
            let arena = self.lock_arena();
            arena
                .by_key
                .iter()
                .filter(|(key, _)| key.matches_prefix(service, method, leading_args))
                .filter_map(|(_, id)| arena.nodes.get(&id.0).cloned())
                .collect()
        };
        let count = matches.len();
        trace!(service, method, count, "prefix invalidation");
        for entry in matches {
            self.invalidate_entry(&entry);
        }
        count
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    fn lock_arena(&self) -> std::sync::MutexGuard<'_, Arena> {
        self.arena
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get or create the node entry for `key`.
    pub(crate) fn ensure_entry(&self, key: &CallKey) -> Arc<NodeEntry> {
        let mut arena = self.lock_arena();
        if let Some(id) = arena.by_key.get(key) {
            if let Some(entry) = arena.nodes.get(&id.0) {
                return Arc::clone(entry);
            }
        }
        arena.next_id += 1;
        let id = NodeId(arena.next_id);
        let entry = Arc::new(NodeEntry::new(id, key.clone()));
        arena.by_key.insert(key.clone(), id);
        arena.nodes.insert(id.0, Arc::clone(&entry));
        entry
    }

    pub(crate) fn entry_for(&self, key: &CallKey) -> Option<Arc<NodeEntry>> {
        let arena = self.lock_arena();
        let id = arena.by_key.get(key)?;
        arena.nodes.get(&id.0).cloned()
    }

    pub(crate) fn entry_by_id(&self, id: NodeId) -> Option<Arc<NodeEntry>> {
        self.lock_arena().nodes.get(&id.0).cloned()
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate `entry` under single-flight discipline.
    pub(crate) async fn compute_entry<T, F, Fut>(
        self: &Arc<Self>,
        entry: Arc<NodeEntry>,
        session: &Session,
        evaluator: F,
    ) -> ReflexResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(EvalContext) -> Fut,
        Fut: Future<Output = ReflexResult<T>> + Send,
    {
        // Fast path: consistent value or cached terminal error, no locks
        // beyond an atomic state check.
        if let Some(outcome) = Self::cached_outcome::<T>(&entry) {
            return outcome;
        }

        // Per-key evaluation slot. Whoever gets it first evaluates; queued
        // callers re-check below and observe the finished outcome instead
        // of evaluating again.
        let _slot = entry.eval_lock.lock().await;
        if let Some(outcome) = Self::cached_outcome::<T>(&entry) {
            trace!(key = %entry.key(), "single-flight waiter served from finished evaluation");
            return outcome;
        }

        debug!(key = %entry.key(), "evaluating");
        let guard = EvalGuard::arm(&entry);
        let ctx = EvalContext::evaluation(Arc::clone(self), session.clone(), entry.id());
        let reads_handle = ctx.clone();

        let outcome = evaluator(ctx).await;
        let reads = reads_handle.take_reads();

        match outcome {
            Ok(value) => {
                let value: AnyValue = Arc::new(value);
                self.finish_success(&entry, value, reads);
                guard.defuse();
                Self::downcast::<T>(&entry)
            }
            Err(error) => {
                self.finish_failure(&entry, error.clone(), reads);
                guard.defuse();
                Err(error)
            }
        }
    }

    /// Consistent value or cached terminal error, if the node is settled.
    fn cached_outcome<T: Any + Send + Sync>(
        entry: &NodeEntry,
    ) -> Option<ReflexResult<Arc<T>>> {
        let core = entry.read();
        match core.state {
            NodeState::Consistent => {
                drop(core);
                Some(Self::downcast::<T>(entry))
            }
            NodeState::Invalidated => core.error.clone().map(Err),
            NodeState::Computing => None,
        }
    }

    fn downcast<T: Any + Send + Sync>(entry: &NodeEntry) -> ReflexResult<Arc<T>> {
        let value = entry.read().value.clone().ok_or_else(|| {
            ReflexError::from(EvalError::Failed {
                key: entry.key().to_string(),
                reason: "consistent node has no value".into(),
            })
        })?;
        value.downcast::<T>().map_err(|_| {
            EvalError::ValueTypeMismatch {
                key: entry.key().to_string(),
            }
            .into()
        })
    }

    /// Land a successful evaluation: store the value, bump the version and
    /// swap the dependency set atomically.
    fn finish_success(&self, entry: &NodeEntry, value: AnyValue, reads: HashSet<NodeId>) {
        let (old_deps, dirtied) = {
            let mut core = entry.write();
            core.value = Some(value);
            core.error = None;
            core.version += 1;
            let dirtied = core.dirtied;
            core.dirtied = false;
            core.state = if dirtied {
                NodeState::Invalidated
            } else {
                NodeState::Consistent
            };
            (std::mem::replace(&mut core.dependencies, reads.clone()), dirtied)
        };

        self.swap_reverse_edges(entry, &old_deps, &reads);

        if dirtied {
            // A write raced the evaluation; the value landed but is
            // already stale. Tell the watchers.
            self.broadcast(entry.key());
            return;
        }

        // A dependency may have been invalidated between its read and our
        // reverse edge landing above. Re-check: after this point any
        // dependency invalidation reaches us through the edge.
        let stale_dep = reads.iter().any(|id| {
            self.entry_by_id(*id)
                .map(|dep| dep.state() != NodeState::Consistent)
                .unwrap_or(true)
        });
        if stale_dep {
            debug!(key = %entry.key(), "dependency went stale during evaluation");
            self.invalidate_entry(entry);
        }
    }

    /// Land a failed evaluation: the node holds the error, not a value,
    /// until something invalidates it. Dependencies read before the
    /// failure still wire edges so such an invalidation can arrive.
    fn finish_failure(&self, entry: &NodeEntry, error: ReflexError, reads: HashSet<NodeId>) {
        let old_deps = {
            let mut core = entry.write();
            core.value = None;
            core.error = Some(error);
            core.dirtied = false;
            core.state = NodeState::Invalidated;
            std::mem::replace(&mut core.dependencies, reads.clone())
        };
        self.swap_reverse_edges(entry, &old_deps, &reads);
    }

    /// Replace reverse (dependent) edges after a dependency-set swap.
    fn swap_reverse_edges(
        &self,
        entry: &NodeEntry,
        old_deps: &HashSet<NodeId>,
        new_deps: &HashSet<NodeId>,
    ) {
        for added in new_deps.difference(old_deps) {
            if let Some(dep) = self.entry_by_id(*added) {
                dep.write().dependents.insert(entry.id());
            }
        }
        for removed in old_deps.difference(new_deps) {
            if let Some(dep) = self.entry_by_id(*removed) {
                dep.write().dependents.remove(&entry.id());
            }
        }
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Invalidate `start` and breadth-first every live dependent. Each
    /// node is visited at most once per pass, so cycles in the dependency
    /// graph terminate. Visiting an already-invalidated node is a no-op
    /// and does not re-traverse its dependents.
    pub(crate) fn invalidate_entry(&self, start: &NodeEntry) {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        queue.push_back(start.id());
        let mut visits = 0usize;

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            visits += 1;
            if visits > self.config.max_invalidation_visits {
                warn!(
                    start = %start.key(),
                    limit = self.config.max_invalidation_visits,
                    "invalidation pass hit visit bound, stopping traversal"
                );
                break;
            }
            let Some(node) = self.entry_by_id(id) else {
                continue;
            };

            let is_start = id == start.id();
            let (flipped, had_error, dependents) = {
                let mut core = node.write();
                let had_error = core.error.take().is_some();
                match core.state {
                    NodeState::Consistent => {
                        core.state = NodeState::Invalidated;
                        let deps: Vec<NodeId> = core.dependents.iter().copied().collect();
                        (true, had_error, deps)
                    }
                    NodeState::Computing => {
                        core.dirtied = true;
                        (false, had_error, Vec::new())
                    }
                    NodeState::Invalidated => (false, had_error, Vec::new()),
                }
            };

            if flipped {
                trace!(key = %node.key(), "invalidated");
            }
            // The start key is always announced so watchers can debounce
            // bursts; traversed nodes announce only on a real transition
            // (or when a cached failure was cleared for retry).
            if flipped || had_error || is_start {
                self.broadcast(node.key());
            }

            for dep_id in dependents {
                let live = self
                    .entry_by_id(dep_id)
                    .map(|dep| dep.read().dependencies.contains(&id))
                    .unwrap_or(false);
                if live {
                    queue.push_back(dep_id);
                } else {
                    // Dead edge: the dependent is gone or no longer reads
                    // this node. Prune.
                    node.write().dependents.remove(&dep_id);
                }
            }
        }
    }

    fn broadcast(&self, key: &CallKey) {
        // Send fails only when nobody subscribed, which is fine.
        let _ = self.invalidations.send(key.clone());
    }
}

impl std::fmt::Debug for ComputedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedCache")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(method: &'static str, arg: &str) -> CallKey {
        CallKey::new("test", method, vec![ArgValue::from(arg)])
    }

    fn anon() -> Session {
        Session::null()
    }

    #[tokio::test]
    async fn test_consistent_hit_skips_evaluator() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_compute::<u64, _, _>(key("answer", "a"), &anon(), move |_ctx| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42u64)
                })
                .await
                .expect("get_or_compute should succeed");
            assert_eq!(*value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.node_version(&key("answer", "a")), Some(1));
    }

    #[tokio::test]
    async fn test_single_flight_one_evaluation_shared_by_all() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("slow", "a");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute::<u64, _, _>(k, &anon(), move |_ctx| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7u64)
                    })
                    .await
            }));
        }
        for handle in handles {
            let value = handle
                .await
                .expect("task should not panic")
                .expect("evaluation should succeed");
            assert_eq!(*value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_shares_failure() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("failing", "a");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute::<u64, _, _>(k.clone(), &anon(), move |_ctx| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(EvalError::Failed {
                            key: k.to_string(),
                            reason: "backend down".into(),
                        }
                        .into())
                    })
                    .await
            }));
        }
        for handle in handles {
            let err = handle
                .await
                .expect("task should not panic")
                .expect_err("evaluation should fail");
            assert!(matches!(
                err,
                ReflexError::Eval(EvalError::Failed { .. })
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_is_terminal_until_invalidation() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("flaky", "a");

        let eval = |calls: Arc<AtomicUsize>, k: CallKey| {
            move |_ctx: EvalContext| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(EvalError::Failed {
                            key: k.to_string(),
                            reason: "first try fails".into(),
                        }
                        .into())
                    } else {
                        Ok(5u64)
                    }
                }
            }
        };

        cache
            .get_or_compute::<u64, _, _>(k.clone(), &anon(), eval(Arc::clone(&calls), k.clone()))
            .await
            .expect_err("first evaluation should fail");

        // Reads do not silently retry: the cached error comes back.
        cache
            .get_or_compute::<u64, _, _>(k.clone(), &anon(), eval(Arc::clone(&calls), k.clone()))
            .await
            .expect_err("cached failure should be returned");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Invalidation clears the failure and allows a retry.
        cache.invalidate(&k);
        let value = cache
            .get_or_compute::<u64, _, _>(k.clone(), &anon(), eval(Arc::clone(&calls), k.clone()))
            .await
            .expect("retry after invalidation should succeed");
        assert_eq!(*value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_evaluation_does_not_poison() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let k = key("hang", "a");

        let pending = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute::<u64, _, _>(k, &anon(), |_ctx| async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(1u64)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.node_state(&k), Some(NodeState::Computing));
        pending.abort();
        let _ = pending.await;

        let value = cache
            .get_or_compute::<u64, _, _>(k.clone(), &anon(), |_ctx| async { Ok(2u64) })
            .await
            .expect("fresh evaluation after cancellation should succeed");
        assert_eq!(*value, 2);
    }

    async fn build_chain(cache: &Arc<ComputedCache>) -> (CallKey, CallKey, CallKey) {
        // c depends on b depends on a.
        let (ka, kb, kc) = (key("a", "x"), key("b", "x"), key("c", "x"));
        let (ka2, kb2) = (ka.clone(), kb.clone());
        cache
            .get_or_compute::<u64, _, _>(kc.clone(), &anon(), move |ctx| async move {
                let b = ctx
                    .compute::<u64, _, _>(kb2, move |ctx| async move {
                        let a = ctx.compute::<u64, _, _>(ka2, |_ctx| async { Ok(1u64) }).await?;
                        Ok(*a + 1)
                    })
                    .await?;
                Ok(*b + 1)
            })
            .await
            .expect("chain evaluation should succeed");
        (ka, kb, kc)
    }

    #[tokio::test]
    async fn test_invalidation_propagates_transitively() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let (ka, kb, kc) = build_chain(&cache).await;

        assert_eq!(cache.node_state(&ka), Some(NodeState::Consistent));
        assert_eq!(cache.node_state(&kb), Some(NodeState::Consistent));
        assert_eq!(cache.node_state(&kc), Some(NodeState::Consistent));

        // Synchronous: all flipped before invalidate() returns.
        cache.invalidate(&ka);
        assert_eq!(cache.node_state(&ka), Some(NodeState::Invalidated));
        assert_eq!(cache.node_state(&kb), Some(NodeState::Invalidated));
        assert_eq!(cache.node_state(&kc), Some(NodeState::Invalidated));
    }

    #[tokio::test]
    async fn test_invalidation_is_idempotent() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let (ka, kb, _kc) = build_chain(&cache).await;

        let mut rx = cache.subscribe_invalidations();
        cache.invalidate(&ka);
        // First pass: a, b and c all announced.
        let mut announced = Vec::new();
        while let Ok(k) = rx.try_recv() {
            announced.push(k);
        }
        assert_eq!(announced.len(), 3);

        // Second pass: a is already invalidated, so only the explicit
        // key is announced and dependents are not re-traversed.
        cache.invalidate(&ka);
        let mut announced = Vec::new();
        while let Ok(k) = rx.try_recv() {
            announced.push(k);
        }
        assert_eq!(announced, vec![ka.clone()]);
        assert_eq!(cache.node_state(&kb), Some(NodeState::Invalidated));
    }

    #[tokio::test]
    async fn test_reevaluation_drops_stale_edges() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let (ka, kb, _kc) = build_chain(&cache).await;
        cache.invalidate(&kb);

        // Re-evaluate b without reading a: the a -> b edge must drop.
        cache
            .get_or_compute::<u64, _, _>(kb.clone(), &anon(), |_ctx| async { Ok(10u64) })
            .await
            .expect("re-evaluation should succeed");
        assert_eq!(cache.node_state(&kb), Some(NodeState::Consistent));

        cache.invalidate(&ka);
        // b no longer depends on a.
        assert_eq!(cache.node_state(&kb), Some(NodeState::Consistent));
    }

    #[tokio::test]
    async fn test_invalidation_terminates_on_cyclic_edges() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let (ka, kb) = (key("a", "cyc"), key("b", "cyc"));
        let a = cache.ensure_entry(&ka);
        let b = cache.ensure_entry(&kb);

        // Stale edges from different evaluation generations can form a
        // cycle in the dependent graph; the visited set must stop it.
        {
            let mut ca = a.write();
            ca.state = NodeState::Consistent;
            ca.dependencies.insert(b.id());
            ca.dependents.insert(b.id());
        }
        {
            let mut cb = b.write();
            cb.state = NodeState::Consistent;
            cb.dependencies.insert(a.id());
            cb.dependents.insert(a.id());
        }

        cache.invalidate(&ka);
        assert_eq!(cache.node_state(&ka), Some(NodeState::Invalidated));
        assert_eq!(cache.node_state(&kb), Some(NodeState::Invalidated));
    }

    #[tokio::test]
    async fn test_invalidate_prefix_targets_matching_keys_only() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let s1 = Session::new("one");
        let s2 = Session::new("two");

        for (session, page) in [(&s1, 0i64), (&s1, 1), (&s2, 0)] {
            let k = CallKey::new(
                "todo",
                "list",
                vec![ArgValue::from(session), ArgValue::from(page)],
            );
            cache
                .get_or_compute::<u64, _, _>(k, &anon(), |_ctx| async { Ok(0u64) })
                .await
                .expect("evaluation should succeed");
        }

        let touched = cache.invalidate_prefix("todo", "list", &[ArgValue::from(&s1)]);
        assert_eq!(touched, 2);

        let k_s2 = CallKey::new(
            "todo",
            "list",
            vec![ArgValue::from(&s2), ArgValue::from(0i64)],
        );
        assert_eq!(cache.node_state(&k_s2), Some(NodeState::Consistent));
    }

    #[tokio::test]
    async fn test_invalidation_during_evaluation_is_not_lost() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let k = key("raced", "a");
        let gate = Arc::new(tokio::sync::Notify::new());

        let pending = {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                cache
                    .get_or_compute::<u64, _, _>(k, &anon(), move |_ctx| async move {
                        gate.notified().await;
                        Ok(1u64)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.node_state(&k), Some(NodeState::Computing));

        // Write lands while the evaluation is still in flight.
        cache.invalidate(&k);
        gate.notify_one();
        pending
            .await
            .expect("task should not panic")
            .expect("evaluation should succeed");

        // The value landed, but stale: the next read re-evaluates.
        assert_eq!(cache.node_state(&k), Some(NodeState::Invalidated));
    }

    #[tokio::test]
    async fn test_value_type_mismatch_is_reported() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let k = key("typed", "a");
        cache
            .get_or_compute::<u64, _, _>(k.clone(), &anon(), |_ctx| async { Ok(1u64) })
            .await
            .expect("evaluation should succeed");

        let err = cache
            .get_or_compute::<String, _, _>(k, &anon(), |_ctx| async { Ok(String::new()) })
            .await
            .expect_err("reading with the wrong type should fail");
        assert!(matches!(
            err,
            ReflexError::Eval(EvalError::ValueTypeMismatch { .. })
        ));
    }
}
