use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};

use unified::action::{ControlAction, ControlError, ControlResult};
use unified::api::Entity;

use crate::error::HubError;
use crate::events::StateChangeContext;
use crate::service::UnifiedEntityService;

impl UnifiedEntityService {
    /// How long an adapter gets to run one action.
    const ACTION_DEADLINE: Duration = Duration::from_secs(30);

    /// Delay before reconciling with upstream truth after an action.
    const REFRESH_DELAY: Duration = Duration::from_secs(1);

    /// Route a control action to the adapter owning the target entity.
    ///
    /// Never returns a raw transport error: every failure mode comes back
    /// as a `ControlResult` with a populated error.
    pub async fn execute_action(self: &Arc<Self>, action: ControlAction) -> ControlResult {
        let started = Utc::now();

        if let Err(err) = action.validate() {
            return ControlResult::fail(ControlError::new("invalid", err.to_string()), started);
        }

        let Some(entity) = self.lookup_entity(&action.entity_id).await else {
            let err = HubError::EntityNotFound(action.entity_id.clone());
            return ControlResult::fail(ControlError::new(err.code(), err.to_string()), started);
        };

        if !entity.supports_action(&action.action) {
            let err = HubError::UnsupportedAction {
                entity: entity.id.clone(),
                action: action.action.clone(),
            };
            return ControlResult::fail(ControlError::new(err.code(), err.to_string()), started);
        }

        let Some(adapter) = self.registries.adapters.get_by_source(entity.source()).await else {
            let err = HubError::AdapterNotFound(entity.source());
            return ControlResult::fail(ControlError::new(err.code(), err.to_string()), started);
        };

        let result = match timeout(Self::ACTION_DEADLINE, adapter.execute_action(&action)).await {
            Ok(result) => result,
            Err(_) => {
                let err = HubError::DeadlineExceeded;
                return ControlResult::fail(ControlError::new(err.code(), err.to_string()), started);
            }
        };

        if result.success {
            self.commit_action_result(&entity, &result).await;

            // reconcile with upstream truth shortly after; the adapter's
            // own view may lag the acknowledged command
            let service = self.clone();
            let entity_id = entity.id.clone();
            tokio::spawn(async move {
                sleep(Self::REFRESH_DELAY).await;
                service.refresh_entity(&entity_id).await;
            });
        }

        result
    }

    /// Apply an acknowledged action result to the stored entity and emit
    /// exactly one state-change broadcast for it.
    async fn commit_action_result(&self, entity: &Entity, result: &ControlResult) {
        let old_state = entity.state;
        let Some(new_state) = result.new_state else {
            return;
        };
        if new_state == old_state {
            return;
        }

        let mut updated = entity.clone();
        updated.state = new_state;
        updated.last_updated = Utc::now();
        for (key, value) in &result.attributes {
            updated.attributes.insert(key.clone(), value.clone());
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set(&updated).await {
                log::warn!("Cache write after action failed for {}: {err}", updated.id);
            }
        }
        if let Err(err) = self.registries.entities.update(updated.clone()).await {
            log::warn!("Registry update after action failed for {}: {err}", updated.id);
        }

        self.emitter.on_entity_state_change(
            &updated.id,
            old_state,
            new_state,
            StateChangeContext::internal(updated.source()),
        );
    }

    /// Re-fetch one entity from its adapter and fold the upstream view
    /// back into the registry and cache.
    pub(crate) async fn refresh_entity(&self, entity_id: &str) {
        let Some(current) = self.lookup_entity(entity_id).await else {
            return;
        };
        let Some(adapter) = self.registries.adapters.get_by_source(current.source()).await else {
            return;
        };

        let batch = match adapter.sync_entities().await {
            Ok(batch) => batch,
            Err(err) => {
                log::warn!("Refresh sync for {entity_id:?} failed: {err}");
                return;
            }
        };

        let Some(fresh) = batch.entities.into_iter().find(|e| e.id == entity_id) else {
            log::debug!("Refresh: {entity_id:?} no longer reported by its source");
            return;
        };

        let old_state = current.state;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set(&fresh).await {
                log::warn!("Cache write during refresh failed for {entity_id:?}: {err}");
            }
        }
        if let Err(err) = self.registries.entities.update(fresh.clone()).await {
            log::warn!("Registry update during refresh failed for {entity_id:?}: {err}");
            return;
        }

        if fresh.state != old_state {
            let source = fresh.source();
            let new_state = fresh.state;
            let id = fresh.id;
            self.broadcast_guarded(move |emitter| {
                emitter.on_entity_state_change(
                    &id,
                    old_state,
                    new_state,
                    StateChangeContext::internal(source),
                );
            });
        }
    }
}
