//! The todo compute service: session-scoped cached queries over a
//! key-value store, plus the two write commands.
//!
//! Every query resolves the session before touching the store, and every
//! call key carries the session, so cache entries never leak across
//! principals. Commands declare their invalidation footprint by re-walking
//! the same key accesses the queries perform, under the invalidation
//! marker.

use crate::todo::{Todo, TodoPageResponse};
use chrono::Utc;
use reflex_core::{new_id, ArgValue, CallKey, CommandDescriptor, ReflexResult, Session, UserId};
use reflex_engine::{Command, CommandContext, CommandDispatcher, EvalContext, SessionResolver};
use reflex_kv::{KeyValueStore, PageRef};
use std::sync::Arc;
use tracing::debug;

/// Service descriptor shared by all todo call keys.
pub const SERVICE: &str = "todo";

/// Scan width used when counting items across the whole prefix.
const COUNT_SCAN_SIZE: usize = 100;

fn item_prefix(user_id: &UserId) -> String {
    format!("todo/{user_id}/items")
}

fn item_key(user_id: &UserId, id: &str) -> String {
    format!("{}/{id}", item_prefix(user_id))
}

/// Todo queries and command handlers over a pluggable store.
pub struct TodoService<S> {
    store: Arc<S>,
    resolver: Arc<dyn SessionResolver>,
}

impl<S> Clone for TodoService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<S: KeyValueStore + 'static> TodoService<S> {
    pub fn new(store: Arc<S>, resolver: Arc<dyn SessionResolver>) -> Self {
        Self { store, resolver }
    }

    // ------------------------------------------------------------------
    // Call keys
    // ------------------------------------------------------------------

    pub fn try_get_key(session: &Session, id: &str) -> CallKey {
        CallKey::new(
            SERVICE,
            "try_get",
            vec![ArgValue::from(session), ArgValue::from(id)],
        )
    }

    pub fn list_key(session: &Session, page: &PageRef) -> CallKey {
        CallKey::new(SERVICE, "list", vec![ArgValue::from(session), page.to_arg()])
    }

    pub fn count_key(session: &Session) -> CallKey {
        CallKey::new(SERVICE, "count", vec![ArgValue::from(session)])
    }

    pub fn page_key(session: &Session, page: &PageRef) -> CallKey {
        CallKey::new(SERVICE, "page", vec![ArgValue::from(session), page.to_arg()])
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetch one todo by id, or `None` if absent.
    pub async fn try_get(
        &self,
        ctx: &EvalContext,
        session: &Session,
        id: &str,
    ) -> ReflexResult<Arc<Option<Todo>>> {
        let store = Arc::clone(&self.store);
        let resolver = Arc::clone(&self.resolver);
        let session_owned = session.clone();
        let id_owned = id.to_string();
        ctx.compute(Self::try_get_key(session, id), move |_ctx| async move {
            let user = resolver.resolve_user(&session_owned).await?;
            store.get::<Todo>(&item_key(&user.id, &id_owned)).await
        })
        .await
    }

    /// List one page of the caller's todos, in key order.
    pub async fn list(
        &self,
        ctx: &EvalContext,
        session: &Session,
        page: PageRef,
    ) -> ReflexResult<Arc<Vec<Todo>>> {
        let store = Arc::clone(&self.store);
        let resolver = Arc::clone(&self.resolver);
        let session_owned = session.clone();
        let key = Self::list_key(session, &page);
        ctx.compute(key, move |_ctx| async move {
            let user = resolver.resolve_user(&session_owned).await?;
            let prefix = item_prefix(&user.id);
            let keys = store
                .list_keys_by_prefix(&prefix, page.after.as_deref(), page.count)
                .await?;
            let mut todos = Vec::with_capacity(keys.keys.len());
            for key in &keys.keys {
                if let Some(todo) = store.get::<Todo>(key).await? {
                    todos.push(todo);
                }
            }
            Ok(todos)
        })
        .await
    }

    /// Total number of todos for the caller.
    ///
    /// Its own cache entry with its own invalidation footprint, so page
    /// responses report a real aggregate instead of a placeholder.
    pub async fn todo_count(
        &self,
        ctx: &EvalContext,
        session: &Session,
    ) -> ReflexResult<Arc<u64>> {
        let store = Arc::clone(&self.store);
        let resolver = Arc::clone(&self.resolver);
        let session_owned = session.clone();
        ctx.compute(Self::count_key(session), move |_ctx| async move {
            let user = resolver.resolve_user(&session_owned).await?;
            let prefix = item_prefix(&user.id);
            let mut count = 0u64;
            let mut cursor: Option<String> = None;
            loop {
                let page = store
                    .list_keys_by_prefix(&prefix, cursor.as_deref(), COUNT_SCAN_SIZE)
                    .await?;
                count += page.keys.len() as u64;
                match page.next_cursor() {
                    Some(next) => cursor = Some(next.to_string()),
                    None => break,
                }
            }
            Ok(count)
        })
        .await
    }

    /// One page of todos plus the total count, with the conventional
    /// overfetch: ask `list` for `count + 1` items and truncate.
    ///
    /// Depends on both `list` and `todo_count`, so any write that flips
    /// either flips the page too.
    pub async fn get_todo_page(
        &self,
        ctx: &EvalContext,
        session: &Session,
        page: PageRef,
    ) -> ReflexResult<Arc<TodoPageResponse>> {
        let service = self.clone();
        let session_owned = session.clone();
        let key = Self::page_key(session, &page);
        ctx.compute(key, move |ctx| {
            service.evaluate_page(ctx, session_owned, page)
        })
        .await
    }

    /// A standing subscription over one page: recomputes after a debounce
    /// delay whenever a write flips the page's dependencies.
    pub fn live_page(
        &self,
        cache: Arc<reflex_engine::ComputedCache>,
        session: Session,
        page: PageRef,
    ) -> reflex_engine::LiveState<TodoPageResponse> {
        let service = self.clone();
        let key = Self::page_key(&session, &page);
        let eval_session = session.clone();
        reflex_engine::LiveState::spawn(cache, key, session, move |ctx| {
            service
                .clone()
                .evaluate_page(ctx, eval_session.clone(), page.clone())
        })
    }

    /// The page evaluation body, shared by the cached query and live
    /// subscriptions; `ctx` is the page node's own evaluation scope, so
    /// the nested `list` and `todo_count` reads land as its dependencies.
    async fn evaluate_page(
        self,
        ctx: EvalContext,
        session: Session,
        page: PageRef,
    ) -> ReflexResult<TodoPageResponse> {
        let items = self.list(&ctx, &session, page.one_more()).await?;
        let total_items = *self.todo_count(&ctx, &session).await?;
        let mut todos = (*items).clone();
        let has_more = todos.len() > page.count;
        if has_more {
            todos.truncate(page.count);
        }
        Ok(TodoPageResponse {
            todos,
            total_items,
            has_more,
            last_updated_utc: Utc::now(),
        })
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Register both command handlers on the dispatcher.
    pub fn register(&self, dispatcher: &CommandDispatcher) {
        let service = self.clone();
        dispatcher.register::<AddOrUpdateTodoCommand, _, _>(
            move |cmd: Arc<AddOrUpdateTodoCommand>, cctx: CommandContext| {
                let service = service.clone();
                async move {
                    if cctx.is_invalidating() {
                        let id = (!cmd.item.id.is_empty()).then(|| cmd.item.id.clone());
                        service
                            .declare_write_footprint(&cctx.ctx, cmd.session(), id.as_deref())
                            .await?;
                        return Ok(Todo::default());
                    }
                    let mut todo = cmd.item.clone();
                    if todo.id.is_empty() {
                        todo.id = new_id().to_string();
                    }
                    let key = item_key(&cctx.user.id, &todo.id);
                    service.store.set(&key, &todo).await?;
                    debug!(user = %cctx.user.name, id = %todo.id, "todo stored");
                    Ok(todo)
                }
            },
        );

        let service = self.clone();
        dispatcher.register::<RemoveTodoCommand, _, _>(
            move |cmd: Arc<RemoveTodoCommand>, cctx: CommandContext| {
                let service = service.clone();
                async move {
                    if cctx.is_invalidating() {
                        service
                            .declare_write_footprint(&cctx.ctx, cmd.session(), Some(&cmd.id))
                            .await?;
                        return Ok(());
                    }
                    let key = item_key(&cctx.user.id, &cmd.id);
                    service.store.remove(&key).await?;
                    debug!(user = %cctx.user.name, id = %cmd.id, "todo removed");
                    Ok(())
                }
            },
        );
    }

    /// Re-walk the key accesses a write affects, under the invalidation
    /// marker: the single item (when its id is known), the count, and
    /// every cached listing page for this session. Cached page responses
    /// flip transitively through their count and list dependencies.
    async fn declare_write_footprint(
        &self,
        ctx: &EvalContext,
        session: &Session,
        id: Option<&str>,
    ) -> ReflexResult<()> {
        if let Some(id) = id {
            ctx.compute::<Option<Todo>, _, _>(Self::try_get_key(session, id), |_ctx| async {
                Ok(None)
            })
            .await?;
        }
        ctx.compute::<u64, _, _>(Self::count_key(session), |_ctx| async { Ok(0) })
            .await?;
        ctx.invalidate_prefix(SERVICE, "list", &[ArgValue::from(session)]);
        Ok(())
    }
}

/// Insert a todo, or overwrite the one with the same id. Returns the
/// stored item, with the id assigned when the input had none.
#[derive(Debug, Clone)]
pub struct AddOrUpdateTodoCommand {
    pub session: Session,
    pub item: Todo,
}

impl Command for AddOrUpdateTodoCommand {
    type Output = Todo;
    const DESCRIPTOR: CommandDescriptor = CommandDescriptor::new(SERVICE, "add_or_update");

    fn session(&self) -> &Session {
        &self.session
    }
}

/// Remove a todo by id. Removing an absent id is a no-op.
#[derive(Debug, Clone)]
pub struct RemoveTodoCommand {
    pub session: Session,
    pub id: String,
}

impl Command for RemoveTodoCommand {
    type Output = ();
    const DESCRIPTOR: CommandDescriptor = CommandDescriptor::new(SERVICE, "remove");

    fn session(&self) -> &Session {
        &self.session
    }
}
