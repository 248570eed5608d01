//! Sessions and resolved principals.
//!
//! A [`Session`] is an opaque token identifying a caller. The engine never
//! inspects the token itself; it asks a session resolver to turn it into a
//! [`User`] and fails the whole operation if that does not succeed.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a resolved user.
pub type UserId = Uuid;

/// Opaque session token.
///
/// Sessions participate in call keys for all session-scoped queries and
/// commands, which is what keeps cache entries from leaking across
/// principals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(String);

impl Session {
    /// Wrap a raw session token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The null session: an anonymous caller that no resolver will accept.
    pub fn null() -> Self {
        Self(String::new())
    }

    /// Whether this is the null (anonymous) session.
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw token, for resolvers only.
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Shortened form safe for logs and error messages.
    pub fn redacted(&self) -> String {
        if self.0.len() <= 4 {
            "****".to_string()
        } else {
            format!("{}****", &self.0[..4])
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// A resolved, authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

impl User {
    /// Create a user with a fresh UUIDv7 id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
        }
    }

    /// Create a user with a known id.
    pub fn with_id(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
