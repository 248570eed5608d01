//! Call keys: canonical identity of a cacheable computation.
//!
//! A [`CallKey`] is `(service, method, ordered arguments)`. Two calls with
//! equal keys are the same cache entry, so equality and hashing must be
//! structural over the full argument tuple, including compound arguments
//! such as paging cursors.

use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single, hashable argument atom inside a call key.
///
/// Arguments are kept as a small closed enum rather than arbitrary JSON so
/// that keys are `Eq + Hash + Ord` without any canonicalization step.
/// Compound arguments (page references, cursors) encode as `List` or `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArgValue {
    /// Absent / null argument.
    Null,
    /// Boolean argument.
    Bool(bool),
    /// Integer argument.
    Int(i64),
    /// Text argument (ids, cursors).
    Text(String),
    /// Session token; present in every session-scoped key so cache entries
    /// never leak across principals.
    Session(Session),
    /// Ordered compound argument.
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Encode an optional string (e.g. an opaque cursor) as an argument.
    pub fn opt_text(value: Option<&str>) -> Self {
        match value {
            Some(v) => ArgValue::Text(v.to_string()),
            None => ArgValue::Null,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Text(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Text(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<usize> for ArgValue {
    fn from(v: usize) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<&Session> for ArgValue {
    fn from(v: &Session) -> Self {
        ArgValue::Session(v.clone())
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => write!(f, "null"),
            ArgValue::Bool(v) => write!(f, "{v}"),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::Text(v) => write!(f, "{v:?}"),
            ArgValue::Session(s) => write!(f, "session:{}", s.redacted()),
            ArgValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Canonical identity of a cached computation.
///
/// Service and method names are static descriptors registered at startup
/// (no reflection-based scanning); the argument tuple carries everything
/// else, including the session for session-scoped calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// Owning service descriptor, e.g. `"todo"`.
    pub service: &'static str,
    /// Method descriptor within the service, e.g. `"try_get"`.
    pub method: &'static str,
    /// Ordered call arguments.
    pub args: Vec<ArgValue>,
}

impl CallKey {
    /// Build a call key from a service, method and argument tuple.
    pub fn new(
        service: &'static str,
        method: &'static str,
        args: impl Into<Vec<ArgValue>>,
    ) -> Self {
        Self {
            service,
            method,
            args: args.into(),
        }
    }

    /// Whether this key belongs to `service::method` and starts with the
    /// given leading arguments.
    ///
    /// Used for footprint invalidation when a write affects every cached
    /// call of a method regardless of trailing arguments (e.g. all pages
    /// of a listing for one session).
    pub fn matches_prefix(
        &self,
        service: &str,
        method: &str,
        leading_args: &[ArgValue],
    ) -> bool {
        self.service == service
            && self.method == method
            && self.args.len() >= leading_args.len()
            && self.args[..leading_args.len()] == *leading_args
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.service, self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}
