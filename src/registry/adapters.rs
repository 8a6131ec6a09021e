use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use unified::health::AdapterMetrics;
use unified::source::SourceKind;

use crate::adapter::Adapter;
use crate::error::{HubError, HubResult};

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Arc<dyn Adapter>>,
    by_source: HashMap<SourceKind, String>,
    metrics: HashMap<String, AdapterMetrics>,
}

/// Thread-safe store of adapters, indexed by adapter id and by source
/// kind. At most one adapter per source kind: registering a second one
/// evicts the first.
#[derive(Default)]
pub struct AdapterRegistry {
    inner: RwLock<Inner>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, adapter: Arc<dyn Adapter>) -> HubResult<()> {
        let id = adapter.id().to_string();
        if id.is_empty() {
            return Err(HubError::EmptyEntityId);
        }
        let source = adapter.source_kind();

        let mut inner = self.inner.write().await;

        if inner.by_id.contains_key(&id) {
            return Err(HubError::AdapterAlreadyRegistered(id));
        }

        if let Some(old_id) = inner.by_source.insert(source, id.clone()) {
            log::warn!("Replacing adapter {old_id:?} for source {source} with {id:?}");
            inner.by_id.remove(&old_id);
            inner.metrics.remove(&old_id);
        }

        inner.metrics.insert(id.clone(), AdapterMetrics::default());
        inner.by_id.insert(id, adapter);
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> HubResult<Arc<dyn Adapter>> {
        let mut inner = self.inner.write().await;

        let adapter = inner
            .by_id
            .remove(id)
            .ok_or_else(|| HubError::AdapterIdNotFound(id.to_string()))?;

        let source = adapter.source_kind();
        if inner.by_source.get(&source).is_some_and(|held| held == id) {
            inner.by_source.remove(&source);
        }
        inner.metrics.remove(id);

        Ok(adapter)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    pub async fn get_by_source(&self, source: SourceKind) -> Option<Arc<dyn Adapter>> {
        let inner = self.inner.read().await;
        let id = inner.by_source.get(&source)?;
        inner.by_id.get(id).cloned()
    }

    pub async fn list_all(&self) -> Vec<Arc<dyn Adapter>> {
        self.inner.read().await.by_id.values().cloned().collect()
    }

    pub async fn list_connected(&self) -> Vec<Arc<dyn Adapter>> {
        self.inner
            .read()
            .await
            .by_id
            .values()
            .filter(|a| a.is_connected())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }

    /// Metrics for one adapter. Asks the adapter for a live sample first
    /// (persisting it on success) and falls back to the stored snapshot,
    /// lazily initialized if the adapter never reported.
    pub async fn get_metrics(&self, id: &str) -> HubResult<AdapterMetrics> {
        let adapter = self
            .get_by_id(id)
            .await
            .ok_or_else(|| HubError::AdapterIdNotFound(id.to_string()))?;

        // live sample fetched outside the lock; adapters may do I/O here
        if let Some(live) = adapter.metrics().await {
            self.inner
                .write()
                .await
                .metrics
                .insert(id.to_string(), live.clone());
            return Ok(live);
        }

        let mut inner = self.inner.write().await;
        Ok(inner
            .metrics
            .entry(id.to_string())
            .or_default()
            .clone())
    }
}
