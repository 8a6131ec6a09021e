use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use unified::api::EntityState;
use unified::source::SourceKind;

use crate::adapter::StateIngress;
use crate::error::HubResult;
use crate::events::StateChangeContext;
use crate::service::UnifiedEntityService;

impl UnifiedEntityService {
    /// Apply an adapter-observed state change. Returns the (old, new) pair
    /// when something actually changed, `None` for no-ops and unknown ids.
    async fn apply_state_update(
        &self,
        entity_id: &str,
        new_state: EntityState,
        source: SourceKind,
    ) -> HubResult<Option<(EntityState, EntityState)>> {
        // cache first, registry as fallback; never create on ingress
        let Some(mut entity) = self.lookup_entity(entity_id).await else {
            log::debug!("Ingress for unknown entity {entity_id:?} from {source}, dropping");
            return Ok(None);
        };

        let old_state = entity.state;
        if old_state == new_state {
            return Ok(None);
        }

        // mutate in place rather than rebuilding the entity
        entity.state = new_state;
        entity.last_updated = Utc::now();
        entity.metadata.last_synced = Utc::now();

        self.cache_set(&entity).await;
        if let Err(err) = self.registries.entities.update(entity).await {
            log::warn!("Registry update from ingress failed for {entity_id:?}: {err}");
            return Err(err);
        }

        Ok(Some((old_state, new_state)))
    }

    /// Broadcast in the caller's task. The emitter contract is
    /// non-blocking, but a panicking emitter must not take the ingress
    /// path down with it.
    fn broadcast_sync(&self, broadcast: impl FnOnce(&dyn crate::events::EventEmitter)) {
        let emitter = &*self.emitter;
        if std::panic::catch_unwind(AssertUnwindSafe(|| broadcast(emitter))).is_err() {
            log::error!("Event emitter panicked during state-change broadcast");
        }
    }
}

#[async_trait]
impl StateIngress for UnifiedEntityService {
    /// The single entry point for adapter-initiated state updates.
    /// Broadcasts synchronously, in the calling task, so push sources get
    /// sub-poll-interval latency end to end.
    async fn update_entity_state(
        &self,
        entity_id: &str,
        new_state: EntityState,
        source: SourceKind,
    ) -> HubResult<()> {
        let Some((old_state, new_state)) =
            self.apply_state_update(entity_id, new_state, source).await?
        else {
            return Ok(());
        };

        self.broadcast_sync(|emitter| {
            emitter.on_entity_state_change(
                entity_id,
                old_state,
                new_state,
                StateChangeContext::internal(source),
            );
        });
        Ok(())
    }

    /// Like `update_entity_state`, plus a second, asynchronous broadcast
    /// flagged as externally triggered and carrying the caller-supplied
    /// metadata (how physical-switch events are told apart from API ones).
    async fn handle_external_state_change(
        &self,
        entity_id: &str,
        new_state: EntityState,
        source: SourceKind,
        metadata: BTreeMap<String, Value>,
    ) -> HubResult<()> {
        let Some((old_state, new_state)) =
            self.apply_state_update(entity_id, new_state, source).await?
        else {
            return Ok(());
        };

        self.broadcast_sync(|emitter| {
            emitter.on_entity_state_change(
                entity_id,
                old_state,
                new_state,
                StateChangeContext::internal(source),
            );
        });

        let entity_id = entity_id.to_string();
        self.broadcast_guarded(move |emitter| {
            emitter.on_entity_state_change(
                &entity_id,
                old_state,
                new_state,
                StateChangeContext::external(source, metadata),
            );
        });
        Ok(())
    }
}
