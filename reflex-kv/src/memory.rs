//! In-memory key-value store backed by an ordered map.
//!
//! The reference backend for tests and samples. `BTreeMap` keeps keys
//! sorted, which makes prefix scans deterministic and lets the opaque
//! cursor be "the last key of the previous page".

use crate::page::KeyPage;
use crate::KeyValueStore;
use async_trait::async_trait;
use reflex_core::{ReflexResult, StoreError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

/// In-memory [`KeyValueStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> ReflexResult<Option<T>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(None),
            Some(raw) => {
                let value = serde_json::from_value(raw.clone()).map_err(|e| {
                    StoreError::Serde {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(value))
            }
        }
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> ReflexResult<()> {
        let raw = serde_json::to_value(value).map_err(|e| StoreError::Serde {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.entries.write().await.insert(key.to_string(), raw);
        Ok(())
    }

    async fn remove(&self, key: &str) -> ReflexResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys_by_prefix(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> ReflexResult<KeyPage> {
        if let Some(c) = cursor {
            if !c.starts_with(prefix) {
                return Err(StoreError::BadCursor {
                    cursor: c.to_string(),
                }
                .into());
            }
        }

        let entries = self.entries.read().await;
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        // Peek one past the page to learn has_more in a single scan.
        let mut keys: Vec<String> = entries
            .range((lower, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .take(page_size + 1)
            .cloned()
            .collect();

        let has_more = keys.len() > page_size;
        if has_more {
            keys.truncate(page_size);
        }
        tracing::trace!(prefix, page_size, returned = keys.len(), has_more, "prefix scan");

        Ok(KeyPage { keys, has_more })
    }
}
