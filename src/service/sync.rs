use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::time::timeout;

use unified::api::Entity;
use unified::source::SourceKind;
use unified::sync::{SyncResult, SyncStatus};

use crate::error::{HubError, HubResult};
use crate::events::StateChangeContext;
use crate::service::UnifiedEntityService;

/// Whether a freshly synced view should replace the stored one. Never
/// accepts an older view; equal timestamps are treated as unchanged.
fn should_update_entity(existing: &Entity, incoming: &Entity) -> bool {
    incoming.last_updated > existing.last_updated
}

enum Ingested {
    Registered,
    Updated,
    Unchanged,
}

impl UnifiedEntityService {
    /// Entities processed per batch before yielding, capping peak memory
    /// and letting other tasks breathe during large syncs.
    const SYNC_BATCH_SIZE: usize = 10;
    const BATCH_PAUSE: Duration = Duration::from_millis(5);

    /// One full pass against a single source: pull every entity the
    /// adapter reports, fold them into the registry, then sweep entities
    /// the source stopped reporting.
    pub async fn sync_from_source(self: &Arc<Self>, source: SourceKind) -> HubResult<SyncResult> {
        let _permit = self
            .sync_semaphore
            .try_acquire()
            .map_err(|_| HubError::TooManyConcurrentSyncs)?;

        let adapter = self
            .registries
            .adapters
            .get_by_source(source)
            .await
            .ok_or(HubError::AdapterNotFound(source))?;

        self.emitter.on_sync_status(source, SyncStatus::Syncing, None);
        let started = Instant::now();
        let mut result = SyncResult::empty(source);

        let batch = match timeout(self.config.sync_timeout(), adapter.sync_entities()).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(err)) => {
                self.emitter
                    .on_sync_status(source, SyncStatus::Error, Some(err.to_string()));
                return Err(err);
            }
            Err(_) => {
                result.errors.push(HubError::DeadlineExceeded.to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                self.emitter.on_sync_status(
                    source,
                    SyncStatus::Error,
                    Some("sync deadline exceeded".to_string()),
                );
                return Ok(result);
            }
        };

        let previous_ids = self.registries.entities.ids_for_source(source).await;
        result.entities_found = batch.entities.len();
        result.errors.extend(batch.errors);

        let mut seen = HashSet::with_capacity(batch.entities.len());
        let mut pending = batch.entities.into_iter();

        loop {
            let chunk = pending.by_ref().take(Self::SYNC_BATCH_SIZE).collect::<Vec<_>>();
            if chunk.is_empty() {
                break;
            }
            for entity in chunk {
                let id = entity.id.clone();
                seen.insert(id.clone());
                match self.ingest_entity(entity).await {
                    Ok(Ingested::Registered) => result.entities_registered += 1,
                    Ok(Ingested::Updated) => result.entities_updated += 1,
                    Ok(Ingested::Unchanged) => {}
                    Err(err) => result.errors.push(format!("{id}: {err}")),
                }
            }
            // yield between batches so large syncs don't starve queries
            tokio::task::yield_now().await;
            tokio::time::sleep(Self::BATCH_PAUSE).await;
        }

        // stale sweep: anything this source used to report but no longer
        // does is removed; this is how entities disappear
        for id in previous_ids {
            if seen.contains(&id) {
                continue;
            }
            match self.registries.entities.unregister(&id).await {
                Ok(_) => {
                    result.entities_removed += 1;
                    self.cache_delete(&id).await;
                    let removed_id = id.clone();
                    self.broadcast_guarded(move |emitter| {
                        emitter.on_entity_removed(&removed_id, source);
                    });
                }
                Err(err) => log::debug!("Stale sweep skipped {id:?}: {err}"),
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        let detail = format!(
            "found {}, registered {}, updated {}, removed {}",
            result.entities_found,
            result.entities_registered,
            result.entities_updated,
            result.entities_removed
        );
        self.emitter
            .on_sync_status(source, result.status(), Some(detail));

        Ok(result)
    }

    /// Fold one synced entity into the registry, resolving cross-source
    /// conflicts through the resolver.
    async fn ingest_entity(&self, entity: Entity) -> HubResult<Ingested> {
        let Some(existing) = self.registries.entities.by_id(&entity.id).await else {
            self.registries.entities.register(entity.clone()).await?;
            self.cache_set(&entity).await;
            self.broadcast_guarded(move |emitter| {
                emitter.on_entity_added(&entity);
            });
            return Ok(Ingested::Registered);
        };

        if existing.source() == entity.source() {
            if !should_update_entity(&existing, &entity) {
                return Ok(Ingested::Unchanged);
            }
            let state_changed = existing.state != entity.state;
            self.registries.entities.update(entity.clone()).await?;
            self.cache_set(&entity).await;
            if state_changed {
                let old_state = existing.state;
                let new_state = entity.state;
                let source = entity.source();
                let id = entity.id;
                self.broadcast_guarded(move |emitter| {
                    emitter.on_entity_state_change(
                        &id,
                        old_state,
                        new_state,
                        StateChangeContext::internal(source),
                    );
                });
            }
            return Ok(Ingested::Updated);
        }

        // same id from a different source: let the resolver pick a winner
        let winner = self
            .registries
            .resolver
            .resolve(vec![existing.clone(), entity])?;

        if winner.source() == existing.source() {
            // incumbent survives; the incoming view is discarded
            return Ok(Ingested::Unchanged);
        }

        let old_state = existing.state;
        self.registries.entities.unregister(&existing.id).await?;
        self.registries.entities.register(winner.clone()).await?;
        self.cache_set(&winner).await;

        if winner.state != old_state {
            let new_state = winner.state;
            let source = winner.source();
            let id = winner.id;
            self.broadcast_guarded(move |emitter| {
                emitter.on_entity_state_change(
                    &id,
                    old_state,
                    new_state,
                    StateChangeContext::internal(source),
                );
            });
        }
        Ok(Ingested::Updated)
    }

    /// Sync every connected adapter. More than one runs in parallel under
    /// a small fan-out cap; a single adapter syncs inline.
    pub async fn sync_from_all_sources(self: &Arc<Self>) -> Vec<SyncResult> {
        let sources = self
            .registries
            .adapters
            .list_connected()
            .await
            .iter()
            .map(|a| a.source_kind())
            .collect::<Vec<_>>();

        match sources.as_slice() {
            [] => Vec::new(),
            [source] => vec![self.checked_sync(*source).await],
            _ => {
                join_all(sources.into_iter().map(|source| {
                    let service = self.clone();
                    async move {
                        let _permit = service.fanout_semaphore.acquire().await;
                        service.checked_sync(source).await
                    }
                }))
                .await
            }
        }
    }

    async fn checked_sync(self: &Arc<Self>, source: SourceKind) -> SyncResult {
        match self.sync_from_source(source).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("Sync from {source} failed: {err}");
                let mut result = SyncResult::empty(source);
                result.errors.push(err.to_string());
                result
            }
        }
    }

    pub(crate) async fn cache_set(&self, entity: &Entity) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set(entity).await {
                log::warn!("Cache write failed for {:?}: {err}", entity.id);
            }
        }
    }

    pub(crate) async fn cache_delete(&self, id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.delete(id).await {
                log::warn!("Cache delete failed for {id:?}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use unified::api::EntityState;
    use unified::source::SourceKind;

    use super::should_update_entity;
    use crate::adapter::Adapter;
    use crate::error::HubError;
    use crate::service::testutil::{MockAdapter, Recorded, TestHub, light};

    #[tokio::test]
    async fn first_sync_registers_everything() {
        let hub = TestHub::new().await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
            light("light.b", SourceKind::HomeAutomation, EntityState::Off),
        ]);
        hub.add_adapter(adapter).await;

        let result = hub
            .service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();
        assert_eq!(result.entities_found, 2);
        assert_eq!(result.entities_registered, 2);
        assert_eq!(result.entities_updated, 0);
        assert_eq!(hub.service.registries().entities.len().await, 2);

        // syncing + completed status broadcasts bracket the pass
        let events = hub.emitter.all();
        assert!(events.contains(&Recorded::Sync(
            SourceKind::HomeAutomation,
            unified::sync::SyncStatus::Syncing
        )));
        assert!(events.contains(&Recorded::Sync(
            SourceKind::HomeAutomation,
            unified::sync::SyncStatus::Completed
        )));
    }

    #[tokio::test]
    async fn unchanged_upstream_sync_is_idempotent() {
        let hub = TestHub::new().await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
        ]);
        hub.add_adapter(adapter).await;

        hub.service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();
        let size = hub.service.registries().entities.len().await;

        let repeat = hub
            .service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();
        assert_eq!(repeat.entities_registered, 0);
        assert_eq!(repeat.entities_updated, 0);
        assert_eq!(hub.service.registries().entities.len().await, size);
    }

    #[tokio::test]
    async fn stale_sweep_removes_missing_entities() {
        let hub = TestHub::new().await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
            light("light.b", SourceKind::HomeAutomation, EntityState::On),
            light("light.c", SourceKind::HomeAutomation, EntityState::On),
        ]);
        hub.add_adapter(adapter.clone()).await;
        hub.service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();

        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
            light("light.c", SourceKind::HomeAutomation, EntityState::On),
        ]);
        let result = hub
            .service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();

        assert_eq!(result.entities_removed, 1);
        assert!(hub.service.registries().entities.by_id("light.b").await.is_none());
        assert!(hub.service.registries().entities.by_id("light.a").await.is_some());
        assert!(hub.service.registries().entities.by_id("light.c").await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.emitter.removed(), vec!["light.b"]);
    }

    #[tokio::test]
    async fn empty_sync_sweeps_all_entities_of_source() {
        let hub = TestHub::new().await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
        ]);
        hub.add_adapter(adapter.clone()).await;
        hub.service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();

        adapter.set_sync_result(vec![]);
        let result = hub
            .service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();
        assert_eq!(result.entities_removed, 1);
        assert!(hub.service.registries().entities.is_empty().await);
    }

    #[tokio::test]
    async fn conflicting_source_loses_to_incumbent_priority() {
        let hub = TestHub::new().await;

        // priority-1 source holds the entity, available, quality 0.9
        let ha = MockAdapter::new("ha", SourceKind::HomeAutomation);
        let mut held = light("light.kitchen", SourceKind::HomeAutomation, EntityState::On);
        held.metadata.quality_score = 0.9;
        ha.set_sync_result(vec![held]);
        hub.add_adapter(ha).await;
        hub.service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();
        let broadcast_floor = hub.emitter.state_changes().len();

        // priority-3 source reports the same id, available, quality 0.95
        let relay = MockAdapter::new("relay", SourceKind::SmartRelay);
        let mut contender = light("light.kitchen", SourceKind::SmartRelay, EntityState::Off);
        contender.metadata.quality_score = 0.95;
        relay.set_sync_result(vec![contender]);
        hub.add_adapter(relay).await;
        hub.service
            .sync_from_source(SourceKind::SmartRelay)
            .await
            .unwrap();

        // the priority-1 view survives, state unchanged, no broadcast
        let entity = hub
            .service
            .registries()
            .entities
            .by_id("light.kitchen")
            .await
            .unwrap();
        assert_eq!(entity.source(), SourceKind::HomeAutomation);
        assert_eq!(entity.state, EntityState::On);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.emitter.state_changes().len(), broadcast_floor);
    }

    #[tokio::test]
    async fn unavailable_incumbent_loses_conflict() {
        let hub = TestHub::new().await;

        let ha = MockAdapter::new("ha", SourceKind::HomeAutomation);
        let mut held = light("light.kitchen", SourceKind::HomeAutomation, EntityState::On);
        held.available = false;
        ha.set_sync_result(vec![held]);
        hub.add_adapter(ha).await;
        hub.service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap();

        let relay = MockAdapter::new("relay", SourceKind::SmartRelay);
        relay.set_sync_result(vec![
            light("light.kitchen", SourceKind::SmartRelay, EntityState::Off),
        ]);
        hub.add_adapter(relay).await;
        hub.service
            .sync_from_source(SourceKind::SmartRelay)
            .await
            .unwrap();

        let entity = hub
            .service
            .registries()
            .entities
            .by_id("light.kitchen")
            .await
            .unwrap();
        assert_eq!(entity.source(), SourceKind::SmartRelay);
    }

    #[tokio::test]
    async fn saturated_semaphore_rejects_sync() {
        let hub = TestHub::new().await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        hub.add_adapter(adapter).await;

        let permits = hub
            .service
            .sync_semaphore
            .clone()
            .acquire_many_owned(hub.service.config.max_concurrent_syncs as u32)
            .await
            .unwrap();

        let err = hub
            .service
            .sync_from_source(SourceKind::HomeAutomation)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::TooManyConcurrentSyncs));
        drop(permits);
    }

    #[tokio::test]
    async fn all_sources_aggregates_connected_adapters() {
        let hub = TestHub::new().await;
        let ha = MockAdapter::new("ha", SourceKind::HomeAutomation);
        ha.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
        ]);
        hub.add_adapter(ha).await;

        let relay = MockAdapter::new("relay", SourceKind::SmartRelay);
        relay.set_sync_result(vec![
            light("switch.b", SourceKind::SmartRelay, EntityState::Off),
        ]);
        hub.add_adapter(relay.clone()).await;

        let disconnected = MockAdapter::new("cam", SourceKind::CameraCloud);
        disconnected.disconnect().await.unwrap();
        hub.add_adapter(disconnected).await;

        let results = hub.service.sync_from_all_sources().await;
        assert_eq!(results.len(), 2);
        assert_eq!(hub.service.registries().entities.len().await, 2);
    }

    #[test]
    fn never_accepts_older_view() {
        let mut existing = light("a", SourceKind::HomeAutomation, EntityState::On);
        let mut incoming = light("a", SourceKind::HomeAutomation, EntityState::Off);

        incoming.last_updated = existing.last_updated - chrono::Duration::seconds(10);
        assert!(!should_update_entity(&existing, &incoming));

        incoming.last_updated = existing.last_updated;
        assert!(!should_update_entity(&existing, &incoming));

        existing.last_updated = Utc::now() - chrono::Duration::seconds(60);
        incoming.last_updated = Utc::now();
        assert!(should_update_entity(&existing, &incoming));
    }
}
