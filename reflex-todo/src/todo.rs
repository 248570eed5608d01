//! Todo item and page-response types.

use chrono::Utc;
use reflex_core::Timestamp;
use serde::{Deserialize, Serialize};

/// A single todo item, stored as one key-value entry per user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// UUIDv7 string, assigned on first write when empty.
    pub id: String,
    pub title: String,
    pub is_done: bool,
}

impl Todo {
    /// A not-yet-stored todo; the add command assigns the id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            is_done: false,
        }
    }

    pub fn done(mut self, is_done: bool) -> Self {
        self.is_done = is_done;
        self
    }
}

/// One page of todos plus aggregate bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoPageResponse {
    /// Items for this page, truncated to the requested count.
    pub todos: Vec<Todo>,
    /// Total item count for the user, computed as its own cached call.
    pub total_items: u64,
    /// Whether items exist past this page.
    pub has_more: bool,
    /// When this page was computed.
    pub last_updated_utc: Timestamp,
}

impl Default for TodoPageResponse {
    fn default() -> Self {
        Self {
            todos: Vec::new(),
            total_items: 0,
            has_more: false,
            last_updated_utc: Utc::now(),
        }
    }
}
