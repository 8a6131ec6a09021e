use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use unified::api::Entity;

use crate::error::{HubError, HubResult};

/// Optional out-of-process mirror for fast single-entity lookups.
///
/// A missing entry is `CacheMiss`; transport failures come back as
/// `CacheUnavailable`. Implementations must be safe for concurrent use.
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Serialize and store one entity under its id, with the
    /// implementation's configured TTL.
    async fn set(&self, entity: &Entity) -> HubResult<()>;

    async fn get(&self, id: &str) -> HubResult<Entity>;

    async fn delete(&self, id: &str) -> HubResult<()>;

    async fn list_ids(&self) -> HubResult<Vec<String>>;

    async fn size(&self) -> HubResult<usize>;

    async fn clear(&self) -> HubResult<()>;

    async fn health(&self) -> HubResult<()>;
}

/// Decode a cached payload back into an entity. The embedded `type` tag
/// drives polymorphic reconstruction; payloads with a tag this build does
/// not know degrade to a generic entity instead of failing the lookup.
pub fn decode_entity(mut value: Value) -> HubResult<Entity> {
    match serde_json::from_value::<Entity>(value.clone()) {
        Ok(entity) => Ok(entity),
        Err(_) => {
            value["type"] = json!("generic");
            Ok(serde_json::from_value(value)?)
        }
    }
}

struct CacheEntry {
    payload: Value,
    expires_at: Instant,
}

/// In-process [`EntityCache`]. Entries are stored as serialized JSON so the
/// polymorphic round-trip is exercised exactly as an external cache would.
pub struct MemoryEntityCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryEntityCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EntityCache for MemoryEntityCache {
    async fn set(&self, entity: &Entity) -> HubResult<()> {
        let payload = serde_json::to_value(entity)?;
        self.entries.write().await.insert(
            entity.id.clone(),
            CacheEntry {
                payload,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> HubResult<Entity> {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                decode_entity(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(id);
                Err(HubError::CacheMiss(id.to_string()))
            }
            None => Err(HubError::CacheMiss(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> HubResult<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn list_ids(&self) -> HubResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn size(&self) -> HubResult<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> HubResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn health(&self) -> HubResult<()> {
        Ok(())
    }
}
