//! REFLEX Test Utilities
//!
//! Centralized test infrastructure for the REFLEX workspace:
//! - Mock session resolver with a fixed token-to-user map
//! - Fixtures for common cache and store scenarios
//! - Proptest generators for call keys, arguments and sessions

// Re-export the in-memory store from its source crate
pub use reflex_kv::MemoryKeyValueStore;

// Re-export core types for convenience
pub use reflex_core::{
    ArgValue, AuthError, CallKey, CommandDescriptor, EngineConfig, LiveStatus, NodeState, Phase,
    ReflexError, ReflexResult, Session, User, UserId,
};
pub use reflex_engine::{ComputedCache, CommandDispatcher, SessionResolver};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// MOCK SESSION RESOLVER
// ============================================================================

/// Session resolver backed by a fixed token map.
///
/// Unknown tokens and the null session fail with
/// `AuthError::Unauthenticated`, matching the fail-closed behavior real
/// resolvers must have.
#[derive(Debug, Clone, Default)]
pub struct MockSessionResolver {
    users: HashMap<String, User>,
}

impl MockSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user for a session token, returning the resolver for
    /// chaining.
    pub fn with_user(mut self, token: impl Into<String>, user: User) -> Self {
        self.users.insert(token.into(), user);
        self
    }

    /// Shorthand: register a fresh user named `name` for `token`.
    pub fn with_named_user(self, token: impl Into<String>, name: impl Into<String>) -> Self {
        self.with_user(token, User::new(name))
    }

    /// Look up the user a token resolves to, if any.
    pub fn user_for(&self, token: &str) -> Option<&User> {
        self.users.get(token)
    }
}

#[async_trait]
impl SessionResolver for MockSessionResolver {
    async fn resolve_user(&self, session: &Session) -> ReflexResult<User> {
        if session.is_null() {
            return Err(AuthError::Unauthenticated {
                session: session.redacted(),
            }
            .into());
        }
        self.users.get(session.token()).cloned().ok_or_else(|| {
            AuthError::Unauthenticated {
                session: session.redacted(),
            }
            .into()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A cache, a dispatcher and a resolver pre-wired with one known session.
pub struct TestHarness {
    pub cache: Arc<ComputedCache>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub resolver: Arc<MockSessionResolver>,
    pub session: Session,
    pub user: User,
}

/// Build a harness whose resolver accepts exactly one token.
pub fn harness(token: &str, user_name: &str) -> TestHarness {
    let user = User::new(user_name);
    let resolver = Arc::new(MockSessionResolver::new().with_user(token, user.clone()));
    let cache = Arc::new(ComputedCache::with_defaults());
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&cache),
        Arc::clone(&resolver) as Arc<dyn SessionResolver>,
    ));
    TestHarness {
        cache,
        dispatcher,
        resolver,
        session: Session::new(token),
        user,
    }
}

/// Deterministic user id for fixtures that need stable keys across runs.
pub fn fixed_user_id(n: u128) -> UserId {
    Uuid::from_u128(n)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for REFLEX key and session types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a session with a printable token.
    pub fn arb_session() -> impl Strategy<Value = Session> {
        "[a-zA-Z0-9]{1,32}".prop_map(Session::new)
    }

    /// Generate an argument value of any variant, including nested lists.
    pub fn arb_arg_value() -> impl Strategy<Value = ArgValue> {
        let leaf = prop_oneof![
            Just(ArgValue::Null),
            any::<bool>().prop_map(ArgValue::Bool),
            any::<i64>().prop_map(ArgValue::Int),
            "[a-zA-Z0-9/_-]{0,24}".prop_map(ArgValue::Text),
            arb_session().prop_map(ArgValue::Session),
        ];
        leaf.prop_recursive(2, 8, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(ArgValue::List)
        })
    }

    /// Generate a call key with a small identifier-shaped service and
    /// method name.
    pub fn arb_call_key() -> impl Strategy<Value = CallKey> {
        (
            prop_oneof![Just("todos"), Just("users"), Just("counter")],
            prop_oneof![Just("get"), Just("list"), Just("count")],
            prop::collection::vec(arb_arg_value(), 0..4),
        )
            .prop_map(|(service, method, args)| CallKey::new(service, method, args))
    }
}
