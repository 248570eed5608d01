//! Live states: durable, auto-refreshing subscriptions over one cached
//! call.
//!
//! A live state owns a background task that evaluates the watched call,
//! then waits for invalidation events, debounces them through an
//! [`UpdateDelayer`] and re-enters `get_or_compute`. Status transitions
//! follow `Loading -> Updating -> InSync / UpdatePending -> Updating`,
//! cyclically. The last refresh error is surfaced separately from the
//! status so a consumer can show stale-but-valid data next to a failure.

use crate::cache::ComputedCache;
use crate::context::EvalContext;
use crate::delayer::UpdateDelayer;
use futures::future::BoxFuture;
use reflex_core::{CallKey, LiveStatus, NodeState, ReflexError, ReflexResult, Session};
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type LiveEvaluator<T> =
    Arc<dyn Fn(EvalContext) -> BoxFuture<'static, ReflexResult<T>> + Send + Sync>;

/// Point-in-time view of a live state.
#[derive(Debug, Clone)]
pub struct LiveSnapshot<T> {
    /// Latest successfully computed value, kept through later failures.
    pub value: Option<Arc<T>>,
    /// Number of completed update attempts (successes and failures).
    pub update_count: u64,
    /// Whether an evaluation is in flight right now.
    pub is_updating: bool,
    /// Error of the most recent failed refresh, cleared by the next
    /// successful one.
    pub last_error: Option<ReflexError>,
    /// Derived status at snapshot time.
    pub status: LiveStatus,
}

#[derive(Debug)]
struct SnapInner<T> {
    value: Option<Arc<T>>,
    update_count: u64,
    is_updating: bool,
    last_error: Option<ReflexError>,
}

struct LiveShared<T> {
    snapshot: RwLock<SnapInner<T>>,
    status_tx: watch::Sender<LiveStatus>,
}

impl<T> LiveShared<T> {
    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, SnapInner<T>> {
        self.snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SnapInner<T>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Derive the UI-facing status from update bookkeeping plus the watched
/// node's consistency state.
fn derive_status(update_count: u64, is_updating: bool, node: Option<NodeState>) -> LiveStatus {
    if update_count == 0 {
        LiveStatus::Loading
    } else if is_updating {
        LiveStatus::Updating
    } else if matches!(node, Some(NodeState::Invalidated) | Some(NodeState::Computing)) {
        LiveStatus::UpdatePending
    } else {
        LiveStatus::InSync
    }
}

/// A standing subscription that auto-refreshes one cached call after a
/// debounce delay once the call is invalidated.
pub struct LiveState<T> {
    cache: Arc<ComputedCache>,
    key: CallKey,
    shared: Arc<LiveShared<T>>,
    delayer: Arc<UpdateDelayer>,
    handle: JoinHandle<()>,
}

impl<T: Any + Send + Sync> LiveState<T> {
    /// Subscribe to `key`: spawns the refresh task and starts the first
    /// evaluation immediately.
    pub fn spawn<F, Fut>(
        cache: Arc<ComputedCache>,
        key: CallKey,
        session: Session,
        evaluator: F,
    ) -> Self
    where
        F: Fn(EvalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReflexResult<T>> + Send + 'static,
    {
        let evaluator: LiveEvaluator<T> = Arc::new(move |ctx| Box::pin(evaluator(ctx)));
        let shared = Arc::new(LiveShared {
            snapshot: RwLock::new(SnapInner {
                value: None,
                update_count: 0,
                is_updating: false,
                last_error: None,
            }),
            status_tx: watch::channel(LiveStatus::Loading).0,
        });
        let delayer = Arc::new(UpdateDelayer::new(cache.config().update_delay));

        // Subscribe before the task starts so no invalidation between
        // construction and the first evaluation is missed.
        let rx = cache.subscribe_invalidations();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&cache),
            key.clone(),
            session,
            evaluator,
            Arc::clone(&shared),
            Arc::clone(&delayer),
            rx,
        ));

        Self {
            cache,
            key,
            shared,
            delayer,
            handle,
        }
    }

    /// The call this subscription watches.
    pub fn key(&self) -> &CallKey {
        &self.key
    }

    /// Current status.
    pub fn status(&self) -> LiveStatus {
        let snap = self.shared.read();
        derive_status(
            snap.update_count,
            snap.is_updating,
            self.cache.node_state(&self.key),
        )
    }

    /// Watch status transitions (for UI binding).
    pub fn status_watch(&self) -> watch::Receiver<LiveStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Point-in-time snapshot of value, bookkeeping and status.
    pub fn snapshot(&self) -> LiveSnapshot<T> {
        let snap = self.shared.read();
        LiveSnapshot {
            value: snap.value.clone(),
            update_count: snap.update_count,
            is_updating: snap.is_updating,
            last_error: snap.last_error.clone(),
            status: derive_status(
                snap.update_count,
                snap.is_updating,
                self.cache.node_state(&self.key),
            ),
        }
    }

    /// Request an instant update: invalidate the watched call and cancel
    /// the pending debounce delay so recomputation starts immediately.
    pub fn requery(&self) {
        debug!(key = %self.key, "requery requested");
        self.cache.invalidate(&self.key);
        self.delayer.cancel_delays();
    }

    /// Detach: stop the refresh task and cancel any pending delayed
    /// refresh. The snapshot stays readable afterwards.
    pub fn dispose(&self) {
        self.delayer.cancel_delays();
        self.handle.abort();
    }
}

impl<T> Drop for LiveState<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_loop<T: Any + Send + Sync>(
    cache: Arc<ComputedCache>,
    key: CallKey,
    session: Session,
    evaluator: LiveEvaluator<T>,
    shared: Arc<LiveShared<T>>,
    delayer: Arc<UpdateDelayer>,
    mut rx: broadcast::Receiver<CallKey>,
) {
    loop {
        shared.lock().is_updating = true;
        publish_status(&cache, &key, &shared);

        let evaluator_call = Arc::clone(&evaluator);
        let result = cache
            .get_or_compute::<T, _, _>(key.clone(), &session, move |ctx| evaluator_call(ctx))
            .await;

        {
            let mut snap = shared.lock();
            snap.is_updating = false;
            snap.update_count += 1;
            match result {
                Ok(value) => {
                    snap.value = Some(value);
                    snap.last_error = None;
                }
                Err(error) => {
                    // Keep the previous value: stale-but-valid data stays
                    // visible next to the refresh failure.
                    snap.last_error = Some(error);
                }
            }
        }
        publish_status(&cache, &key, &shared);
        trace!(key = %key, "live state refreshed");

        // Wait for our node to go stale.
        loop {
            match rx.recv().await {
                Ok(k) if k == key => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => break,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
        publish_status(&cache, &key, &shared);

        // Debounce: collapse invalidation bursts into one refresh.
        delayer.wait(&mut rx, &key).await;
    }
}

fn publish_status<T>(cache: &ComputedCache, key: &CallKey, shared: &LiveShared<T>) {
    let status = {
        let snap = shared.read();
        derive_status(snap.update_count, snap.is_updating, cache.node_state(key))
    };
    shared.status_tx.send_if_modified(|current| {
        if *current != status {
            *current = status;
            true
        } else {
            false
        }
    });
}
