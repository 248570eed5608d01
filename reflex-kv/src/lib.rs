//! REFLEX KV - Key-Value Store Contract
//!
//! Defines the storage abstraction used by leaf evaluators (the engine
//! itself never touches the store). Values are serde-serialized; keys are
//! plain strings, listed in lexicographic order so opaque cursors can
//! resume a prefix scan.

pub mod memory;
pub mod page;

pub use memory::MemoryKeyValueStore;
pub use page::{KeyPage, PageRef};

use async_trait::async_trait;
use reflex_core::ReflexResult;
use serde::{de::DeserializeOwned, Serialize};

/// Pluggable key-value store.
///
/// Implementations must be thread-safe and support concurrent access.
/// Listing is cursor-paged: a `cursor` of `None` starts at the beginning
/// of the prefix range, otherwise the scan resumes strictly after the
/// cursor key. Backends peek one key past `page_size` to compute
/// `has_more` without a second round trip.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key, or `None` if absent.
    async fn get<T: DeserializeOwned>(&self, key: &str) -> ReflexResult<Option<T>>;

    /// Set a value, overwriting any previous one.
    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> ReflexResult<()>;

    /// Remove a key. Removing an absent key is a no-op.
    async fn remove(&self, key: &str) -> ReflexResult<()>;

    /// List keys under `prefix` in lexicographic order.
    ///
    /// Returns at most `page_size` keys plus a `has_more` flag.
    async fn list_keys_by_prefix(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> ReflexResult<KeyPage>;
}
