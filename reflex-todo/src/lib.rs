//! REFLEX Todo - Sample Compute Service
//!
//! A small todo CRUD service built entirely on the reactive engine:
//! session-scoped cached queries over a key-value store, two commands
//! dispatched through the two-phase execute/invalidate protocol, and a
//! paged listing whose total count is a real cached aggregate. The
//! integration tests under `tests/` exercise the engine end to end
//! through this service.

pub mod service;
pub mod todo;

pub use service::{AddOrUpdateTodoCommand, RemoveTodoCommand, TodoService, SERVICE};
pub use todo::{Todo, TodoPageResponse};
