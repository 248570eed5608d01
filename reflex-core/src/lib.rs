//! REFLEX Core - Shared Data Types
//!
//! Pure data structures with no behavior beyond small helpers. All other
//! crates depend on this. This crate contains ONLY data types, the error
//! taxonomy and engine configuration - no caching logic.

pub mod config;
pub mod error;
pub mod key;
pub mod session;
pub mod state;

pub use config::EngineConfig;
pub use error::{
    AuthError, DispatchError, EvalError, ReflexError, ReflexResult, StoreError,
};
pub use key::{ArgValue, CallKey};
pub use session::{Session, User, UserId};
pub use state::{CommandDescriptor, LiveStatus, NodeState, Phase};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 identifier (timestamp-sortable).
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}
