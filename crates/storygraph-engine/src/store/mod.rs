use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::graph::placement::PlacementRegistry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Chapter caches are stored per manifest version, so a new manifest never
/// reads entries built from an older one.
pub fn snapshot_key(book_id: &str, manifest: Option<&str>, chapter_idx: u32) -> String {
    match manifest {
        Some(version) => format!("storygraph:snapshot:{book_id}@{version}:{chapter_idx}"),
        None => format!("storygraph:snapshot:{book_id}:{chapter_idx}"),
    }
}

pub fn manifest_key(book_id: &str) -> String {
    format!("storygraph:manifest:{book_id}")
}

pub fn positions_key(book_id: &str) -> String {
    format!("storygraph:positions:{book_id}")
}

pub async fn load_positions(kv: &dyn KeyValueStore, book_id: &str) -> PlacementRegistry {
    match kv.get(&positions_key(book_id)).await {
        Ok(Some(v)) => serde_json::from_value(v).unwrap_or_else(|e| {
            tracing::warn!(book = book_id, error = %e, "discarding unreadable positions");
            PlacementRegistry::default()
        }),
        Ok(None) => PlacementRegistry::default(),
        Err(e) => {
            tracing::warn!(book = book_id, error = %e, "positions read failed");
            PlacementRegistry::default()
        }
    }
}

pub async fn load_manifest(kv: &dyn KeyValueStore, book_id: &str) -> Option<String> {
    match kv.get(&manifest_key(book_id)).await {
        Ok(Some(Value::String(v))) => Some(v),
        Ok(Some(other)) => {
            tracing::warn!(book = book_id, found = %other, "ignoring malformed manifest version");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(book = book_id, error = %e, "manifest read failed");
            None
        }
    }
}

pub async fn save_manifest(kv: &dyn KeyValueStore, book_id: &str, version: &str) -> Result<(), StoreError> {
    kv.set(&manifest_key(book_id), Value::String(version.to_string()), None)
        .await
}

pub async fn save_positions(
    kv: &dyn KeyValueStore,
    book_id: &str,
    registry: &PlacementRegistry,
) -> Result<(), StoreError> {
    let v = serde_json::to_value(registry)?;
    kv.set(&positions_key(book_id), v, None).await
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| !e.expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
