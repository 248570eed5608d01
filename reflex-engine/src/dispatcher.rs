//! Command dispatcher: executes writes as two-phase calls.
//!
//! A command is addressed to exactly one handler, registered explicitly at
//! startup against a [`CommandDescriptor`]. The dispatcher invokes the
//! handler twice: once with `Phase::Execute` to perform the effect and
//! produce a value, then, synchronously before returning, with
//! `Phase::DeclareInvalidation` active so the handler touches the same
//! keys it would invalidate. Both passes run under the same resolved
//! principal; a command whose session does not resolve fails before any
//! mutation or invalidation occurs.

use crate::cache::ComputedCache;
use crate::context::EvalContext;
use futures::future::BoxFuture;
use reflex_core::{
    CommandDescriptor, DispatchError, EvalError, Phase, ReflexResult, Session, User,
};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Resolves an opaque session token into an authenticated principal.
///
/// The engine calls this at the start of every session-scoped command;
/// leaf evaluators call it themselves for session-scoped queries.
#[async_trait::async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolve the session, or fail with `AuthError::Unauthenticated`.
    async fn resolve_user(&self, session: &Session) -> ReflexResult<User>;
}

/// A single logical write: one value object, one handler, dispatched
/// through [`CommandDispatcher::call`], never invoked directly against
/// cached state.
pub trait Command: Send + Sync + 'static {
    /// Result of the execute phase. `Default` is required because touched
    /// queries return default values during the invalidation pass.
    type Output: Default + Send + Sync + 'static;

    /// Registry descriptor this command is addressed to.
    const DESCRIPTOR: CommandDescriptor;

    /// Session of the issuing caller.
    fn session(&self) -> &Session;
}

/// Everything a command handler gets to work with: the evaluation context
/// (carrying the phase marker) and the resolved principal.
pub struct CommandContext {
    /// Context for cache reads and invalidation declarations.
    pub ctx: EvalContext,
    /// The authenticated caller; resolution happened before the handler
    /// ran, for both phases.
    pub user: User,
}

impl CommandContext {
    /// Whether this is the invalidation pass.
    pub fn is_invalidating(&self) -> bool {
        self.ctx.is_invalidating()
    }
}

type AnyCommand = Arc<dyn Any + Send + Sync>;
type BoxedOutcome = BoxFuture<'static, ReflexResult<Box<dyn Any + Send>>>;
type ErasedHandler = dyn Fn(AnyCommand, CommandContext) -> BoxedOutcome + Send + Sync;

/// Routes commands to their registered handler and drives the two-phase
/// execute/invalidate protocol.
pub struct CommandDispatcher {
    cache: Arc<ComputedCache>,
    resolver: Arc<dyn SessionResolver>,
    handlers: RwLock<HashMap<CommandDescriptor, Vec<Arc<ErasedHandler>>>>,
}

impl CommandDispatcher {
    /// Create a dispatcher over the given cache and session resolver.
    pub fn new(cache: Arc<ComputedCache>, resolver: Arc<dyn SessionResolver>) -> Self {
        Self {
            cache,
            resolver,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for command type `C`.
    ///
    /// The handler is invoked for both phases; it distinguishes them via
    /// `CommandContext::is_invalidating`. Registering a second handler for
    /// the same descriptor makes every later call fail with
    /// `AmbiguousHandler`.
    pub fn register<C, H, Fut>(&self, handler: H)
    where
        C: Command,
        H: Fn(Arc<C>, CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReflexResult<C::Output>> + Send + 'static,
    {
        let erased: Arc<ErasedHandler> = Arc::new(move |cmd: AnyCommand, cctx: CommandContext| {
            let cmd = cmd.downcast::<C>();
            let fut = cmd.map(|cmd| handler(cmd, cctx));
            Box::pin(async move {
                match fut {
                    Ok(fut) => {
                        let output = fut.await?;
                        Ok(Box::new(output) as Box<dyn Any + Send>)
                    }
                    Err(_) => Err(EvalError::ValueTypeMismatch {
                        key: C::DESCRIPTOR.to_string(),
                    }
                    .into()),
                }
            }) as BoxedOutcome
        });

        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(C::DESCRIPTOR)
            .or_default()
            .push(erased);
    }

    /// Number of registered descriptors.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Dispatch a command: resolve the handler and the session, run the
    /// execute phase, then the invalidation phase, then return the execute
    /// result. Recomputation of invalidated nodes is not forced here; live
    /// states pull it.
    pub async fn call<C: Command>(&self, command: C) -> ReflexResult<C::Output> {
        let descriptor = C::DESCRIPTOR;
        let handler = self.single_handler(&descriptor)?;

        // Fail-closed: resolve the principal before any effect. Both
        // phases run under this one resolution.
        let session = command.session().clone();
        let user = self.resolver.resolve_user(&session).await?;
        debug!(%descriptor, user = %user.name, "dispatching command");

        let command: AnyCommand = Arc::new(command);

        let exec_ctx = EvalContext::command(
            Arc::clone(&self.cache),
            session.clone(),
            Phase::Execute,
        );
        let output = handler(
            Arc::clone(&command),
            CommandContext {
                ctx: exec_ctx,
                user: user.clone(),
            },
        )
        .await?;

        // Invalidation pass, synchronously before returning: the handler
        // re-walks its key accesses and every touched node goes stale.
        let inv_ctx = EvalContext::command(
            Arc::clone(&self.cache),
            session,
            Phase::DeclareInvalidation,
        );
        handler(command, CommandContext { ctx: inv_ctx, user }).await?;

        output
            .downcast::<C::Output>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                EvalError::ValueTypeMismatch {
                    key: descriptor.to_string(),
                }
                .into()
            })
    }

    fn single_handler(&self, descriptor: &CommandDescriptor) -> ReflexResult<Arc<ErasedHandler>> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match handlers.get(descriptor).map(Vec::as_slice) {
            None | Some([]) => Err(DispatchError::NoHandlerFound {
                descriptor: descriptor.to_string(),
            }
            .into()),
            Some([single]) => Ok(Arc::clone(single)),
            Some(many) => Err(DispatchError::AmbiguousHandler {
                descriptor: descriptor.to_string(),
                count: many.len(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::{ArgValue, AuthError, CallKey, NodeState, ReflexError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneUserResolver {
        token: &'static str,
    }

    #[async_trait::async_trait]
    impl SessionResolver for OneUserResolver {
        async fn resolve_user(&self, session: &Session) -> ReflexResult<User> {
            if session.token() == self.token {
                Ok(User::new("tester"))
            } else {
                Err(AuthError::Unauthenticated {
                    session: session.redacted(),
                }
                .into())
            }
        }
    }

    #[derive(Debug)]
    struct Bump {
        session: Session,
    }

    impl Command for Bump {
        type Output = u64;
        const DESCRIPTOR: CommandDescriptor = CommandDescriptor::new("counter", "bump");

        fn session(&self) -> &Session {
            &self.session
        }
    }

    fn counter_key() -> CallKey {
        CallKey::new("counter", "value", vec![ArgValue::Null])
    }

    fn dispatcher() -> (Arc<ComputedCache>, CommandDispatcher, Arc<AtomicUsize>) {
        let cache = Arc::new(ComputedCache::with_defaults());
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&cache),
            Arc::new(OneUserResolver { token: "good" }),
        );
        let store = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&store);
        dispatcher.register::<Bump, _, _>(move |_cmd: Arc<Bump>, cctx: CommandContext| {
            let counter = Arc::clone(&counter);
            async move {
                if cctx.is_invalidating() {
                    cctx.ctx
                        .compute::<u64, _, _>(counter_key(), |_ctx| async { Ok(0) })
                        .await?;
                    return Ok(0);
                }
                let value = counter.fetch_add(1, Ordering::SeqCst) as u64 + 1;
                Ok(value)
            }
        });
        (cache, dispatcher, store)
    }

    #[tokio::test]
    async fn test_command_executes_then_invalidates() {
        let (cache, dispatcher, store) = dispatcher();
        let session = Session::new("good");

        // Prime the query cache.
        let store_read = Arc::clone(&store);
        cache
            .get_or_compute::<u64, _, _>(counter_key(), &session, move |_ctx| async move {
                Ok(store_read.load(Ordering::SeqCst) as u64)
            })
            .await
            .expect("query should succeed");
        assert_eq!(cache.node_state(&counter_key()), Some(NodeState::Consistent));

        let value = dispatcher
            .call(Bump { session })
            .await
            .expect("command should succeed");
        assert_eq!(value, 1);
        // Invalidation applied before call() returned.
        assert_eq!(
            cache.node_state(&counter_key()),
            Some(NodeState::Invalidated)
        );
    }

    #[tokio::test]
    async fn test_unresolved_session_fails_closed() {
        let (cache, dispatcher, store) = dispatcher();

        let session = Session::new("good");
        let store_read = Arc::clone(&store);
        cache
            .get_or_compute::<u64, _, _>(counter_key(), &session, move |_ctx| async move {
                Ok(store_read.load(Ordering::SeqCst) as u64)
            })
            .await
            .expect("query should succeed");

        let err = dispatcher
            .call(Bump {
                session: Session::new("bad"),
            })
            .await
            .expect_err("unauthenticated command should fail");
        assert!(err.is_auth());

        // No mutation, no invalidation.
        assert_eq!(store.load(Ordering::SeqCst), 0);
        assert_eq!(cache.node_state(&counter_key()), Some(NodeState::Consistent));
    }

    #[tokio::test]
    async fn test_no_handler_found() {
        let cache = Arc::new(ComputedCache::with_defaults());
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&cache),
            Arc::new(OneUserResolver { token: "good" }),
        );

        let err = dispatcher
            .call(Bump {
                session: Session::new("good"),
            })
            .await
            .expect_err("call without a handler should fail");
        assert!(matches!(
            err,
            ReflexError::Dispatch(DispatchError::NoHandlerFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_handler() {
        let (_cache, dispatcher, _store) = dispatcher();
        dispatcher.register::<Bump, _, _>(|_cmd, _cctx| async { Ok(0) });

        let err = dispatcher
            .call(Bump {
                session: Session::new("good"),
            })
            .await
            .expect_err("two handlers for one descriptor should fail");
        assert!(matches!(
            err,
            ReflexError::Dispatch(DispatchError::AmbiguousHandler { count: 2, .. })
        ));
    }
}
