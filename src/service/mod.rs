mod actions;
mod consistency;
mod ingress;
mod lifecycle;
mod scheduler;
mod sync;

pub use consistency::ConsistencyReport;
pub use scheduler::SchedulerHandle;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use unified::api::{Area, Capability, Entity, EntityType, Room};
use unified::source::SourceKind;

use crate::cache::EntityCache;
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::events::EventEmitter;
use crate::registry::RegistryManager;
use crate::rooms::RoomService;

/// Filters and hydration switches shared by every query operation.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub domain: Option<EntityType>,
    pub include_room: bool,
    pub include_area: bool,
    pub available_only: bool,
    pub capabilities: Vec<Capability>,
}

/// Registry population summary, as reported by
/// [`UnifiedEntityService::entity_stats`].
#[derive(Clone, Debug, Serialize)]
pub struct EntityStats {
    pub total: usize,
    pub by_type: HashMap<EntityType, usize>,
    pub by_source: HashMap<SourceKind, usize>,
    pub broadcasts_dropped: u64,
}

/// An entity as handed to API handlers, optionally hydrated with its room
/// and area.
#[derive(Clone, Debug, Serialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<Area>,
}

/// The coordinator: synchronizes, caches and mutates entity state across
/// all sources, routes control actions to the owning adapter, and fans
/// state changes out through the event emitter.
///
/// One long-lived instance per process; every dependency is injected.
pub struct UnifiedEntityService {
    pub(crate) registries: Arc<RegistryManager>,
    pub(crate) emitter: Arc<dyn EventEmitter>,
    pub(crate) cache: Option<Arc<dyn EntityCache>>,
    pub(crate) rooms: Arc<dyn RoomService>,
    pub(crate) config: HubConfig,
    pub(crate) sync_semaphore: Arc<Semaphore>,
    pub(crate) broadcast_semaphore: Arc<Semaphore>,
    pub(crate) fanout_semaphore: Arc<Semaphore>,
    pub(crate) scheduler: Mutex<Option<SchedulerHandle>>,
    pub(crate) broadcasts_dropped: AtomicU64,
}

impl UnifiedEntityService {
    /// Queries never hang a handler: past this, they return empty.
    const QUERY_DEADLINE: Duration = Duration::from_secs(5);

    /// Concurrent source syncs during an all-sources fan-out.
    const FANOUT_CAPACITY: usize = 2;

    #[must_use]
    pub fn new(
        config: HubConfig,
        registries: Arc<RegistryManager>,
        emitter: Arc<dyn EventEmitter>,
        rooms: Arc<dyn RoomService>,
        cache: Option<Arc<dyn EntityCache>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registries,
            emitter,
            cache,
            rooms,
            sync_semaphore: Arc::new(Semaphore::new(config.max_concurrent_syncs)),
            broadcast_semaphore: Arc::new(Semaphore::new(config.max_concurrent_broadcasts)),
            fanout_semaphore: Arc::new(Semaphore::new(Self::FANOUT_CAPACITY)),
            scheduler: Mutex::new(None),
            broadcasts_dropped: AtomicU64::new(0),
            config,
        })
    }

    #[must_use]
    pub fn registries(&self) -> &RegistryManager {
        &self.registries
    }

    #[must_use]
    pub fn broadcasts_dropped(&self) -> u64 {
        self.broadcasts_dropped.load(Ordering::Relaxed)
    }

    /* query operations */

    /// Every entity passing the filters. Guarded by a deadline: a wedged
    /// registry or room service degrades to an empty list, never an error.
    pub async fn get_all(self: &Arc<Self>, options: QueryOptions) -> Vec<EntityRecord> {
        let service = self.clone();
        let guarded = tokio::spawn(async move {
            let entities = service.registries.entities.all().await;
            service.apply_options(entities, &options).await
        });

        match timeout(Self::QUERY_DEADLINE, guarded).await {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                log::error!("get_all query task failed: {err}");
                Vec::new()
            }
            Err(_) => {
                log::warn!("get_all exceeded its deadline, returning empty result");
                Vec::new()
            }
        }
    }

    /// Single-entity lookup: cache first, registry as fallback. Registry
    /// hits are opportunistically written back to the cache. The one
    /// query that surfaces not-found explicitly.
    pub async fn get_by_id(&self, id: &str, options: QueryOptions) -> HubResult<EntityRecord> {
        if let Some(cache) = &self.cache {
            match cache.get(id).await {
                Ok(entity) => return Ok(self.hydrate(entity, &options).await),
                Err(HubError::CacheMiss(_)) => {}
                Err(err) => log::warn!("Entity cache lookup failed for {id:?}: {err}"),
            }
        }

        let Some(entity) = self.registries.entities.by_id(id).await else {
            return Err(HubError::EntityNotFound(id.to_string()));
        };

        // opportunistic repopulation after a registry hit
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set(&entity).await {
                log::warn!("Entity cache repopulation failed for {id:?}: {err}");
            }
        }
        Ok(self.hydrate(entity, &options).await)
    }

    /// Cache-then-registry fetch used by actions and ingress. Does not
    /// touch the cache on a miss.
    pub(crate) async fn lookup_entity(&self, id: &str) -> Option<Entity> {
        if let Some(cache) = &self.cache {
            match cache.get(id).await {
                Ok(entity) => return Some(entity),
                Err(HubError::CacheMiss(_)) => {}
                Err(err) => log::warn!("Entity cache lookup failed for {id:?}: {err}"),
            }
        }
        self.registries.entities.by_id(id).await
    }

    pub async fn get_by_type(&self, ty: EntityType, options: QueryOptions) -> Vec<EntityRecord> {
        let entities = self.registries.entities.by_type(ty).await;
        self.apply_options(entities, &options).await
    }

    pub async fn get_by_source(
        &self,
        source: SourceKind,
        options: QueryOptions,
    ) -> Vec<EntityRecord> {
        let entities = self.registries.entities.by_source(source).await;
        self.apply_options(entities, &options).await
    }

    pub async fn get_by_room(&self, room_id: &str, options: QueryOptions) -> Vec<EntityRecord> {
        let entities = self.registries.entities.by_room(room_id).await;
        self.apply_options(entities, &options).await
    }

    pub async fn search(&self, query: &str, options: QueryOptions) -> Vec<EntityRecord> {
        let entities = self.registries.entities.search(query).await;
        self.apply_options(entities, &options).await
    }

    async fn apply_options(
        &self,
        entities: Vec<Entity>,
        options: &QueryOptions,
    ) -> Vec<EntityRecord> {
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            if let Some(domain) = options.domain {
                if entity.entity_type() != domain {
                    continue;
                }
            }
            if options.available_only && !entity.available {
                continue;
            }
            if !options
                .capabilities
                .iter()
                .all(|cap| entity.capabilities.contains(cap))
            {
                continue;
            }
            records.push(self.hydrate(entity, options).await);
        }
        records
    }

    async fn hydrate(&self, entity: Entity, options: &QueryOptions) -> EntityRecord {
        let room = if options.include_room {
            match &entity.room_id {
                Some(id) => self.rooms.get_room_by_id(id).await.ok(),
                None => None,
            }
        } else {
            None
        };

        let area = if options.include_area {
            let area_id = entity
                .area_id
                .clone()
                .or_else(|| room.as_ref().and_then(|r| r.area_id.clone()));
            match area_id {
                Some(id) => self.rooms.get_area_by_id(&id).await.ok(),
                None => None,
            }
        } else {
            None
        };

        EntityRecord { entity, room, area }
    }

    /// Registry population summary, for status endpoints and diagnostics.
    pub async fn entity_stats(&self) -> EntityStats {
        EntityStats {
            total: self.registries.entities.len().await,
            by_type: self.registries.entities.counts_by_type().await,
            by_source: self.registries.entities.counts_by_source().await,
            broadcasts_dropped: self.broadcasts_dropped(),
        }
    }

    /* broadcast plumbing */

    /// Run an emitter call on its own task, rate-limited by the broadcast
    /// semaphore. Saturation drops the broadcast (never the state change
    /// it describes) and bumps the drop counter.
    pub(crate) fn broadcast_guarded(
        &self,
        broadcast: impl FnOnce(&dyn EventEmitter) + Send + 'static,
    ) {
        match self.broadcast_semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                let emitter = self.emitter.clone();
                tokio::spawn(async move {
                    broadcast(&*emitter);
                    drop(permit);
                });
            }
            Err(_) => {
                self.broadcasts_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Broadcast semaphore saturated, dropping event");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unified::api::{Capability, EntityState, EntityType, Room};
    use unified::source::SourceKind;

    use super::QueryOptions;
    use crate::cache::EntityCache;
    use crate::error::HubError;
    use crate::service::testutil::{TestHub, light};

    #[tokio::test]
    async fn get_all_applies_filters() {
        let hub = TestHub::new().await;
        hub.seed(light("light.kitchen", SourceKind::HomeAutomation, EntityState::On))
            .await;
        hub.seed(
            light("light.hall", SourceKind::HomeAutomation, EntityState::Off)
                .with_available(false),
        )
        .await;

        let all = hub.service.get_all(QueryOptions::default()).await;
        assert_eq!(all.len(), 2);

        let available = hub
            .service
            .get_all(QueryOptions {
                available_only: true,
                ..QueryOptions::default()
            })
            .await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].entity.id, "light.kitchen");

        let switches = hub
            .service
            .get_all(QueryOptions {
                domain: Some(EntityType::Switch),
                ..QueryOptions::default()
            })
            .await;
        assert!(switches.is_empty());
    }

    #[tokio::test]
    async fn capability_filter_requires_all() {
        let hub = TestHub::new().await;
        hub.seed(
            light("light.kitchen", SourceKind::HomeAutomation, EntityState::On)
                .with_capabilities([Capability::Dimmable]),
        )
        .await;

        let dimmable = hub
            .service
            .get_all(QueryOptions {
                capabilities: vec![Capability::Dimmable],
                ..QueryOptions::default()
            })
            .await;
        assert_eq!(dimmable.len(), 1);

        let colorable = hub
            .service
            .get_all(QueryOptions {
                capabilities: vec![Capability::Dimmable, Capability::Colorable],
                ..QueryOptions::default()
            })
            .await;
        assert!(colorable.is_empty());
    }

    #[tokio::test]
    async fn get_by_id_surfaces_not_found() {
        let hub = TestHub::new().await;
        let err = hub
            .service
            .get_by_id("light.ghost", QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn get_by_id_prefers_cache_and_repopulates() {
        let hub = TestHub::new().await;
        let entity =
            light("light.kitchen", SourceKind::HomeAutomation, EntityState::On);
        hub.seed(entity).await;

        // registry hit repopulates the cache
        hub.service
            .get_by_id("light.kitchen", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(hub.cache.size().await.unwrap(), 1);

        // mutate the cached copy; the next lookup must come from the cache
        let mut cached = hub.cache.get("light.kitchen").await.unwrap();
        cached.state = EntityState::Off;
        hub.cache.set(&cached).await.unwrap();

        let record = hub
            .service
            .get_by_id("light.kitchen", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(record.entity.state, EntityState::Off);
    }

    #[tokio::test]
    async fn room_hydration() {
        let hub = TestHub::new().await;
        hub.rooms.upsert_room(Room::new("kitchen", "Kitchen")).await;
        hub.seed(
            light("light.kitchen", SourceKind::HomeAutomation, EntityState::On).with_room("kitchen"),
        )
        .await;

        let record = hub
            .service
            .get_by_id(
                "light.kitchen",
                QueryOptions {
                    include_room: true,
                    ..QueryOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.room.unwrap().name, "Kitchen");
    }

    #[tokio::test]
    async fn broadcast_saturation_drops_and_counts() {
        let hub = TestHub::new().await;

        // exhaust the broadcast semaphore
        let permits = hub
            .service
            .broadcast_semaphore
            .clone()
            .acquire_many_owned(hub.service.config.max_concurrent_broadcasts as u32)
            .await
            .unwrap();

        hub.service.broadcast_guarded(|_| {});
        assert_eq!(hub.service.broadcasts_dropped(), 1);
        drop(permits);

        hub.service.broadcast_guarded(|_| {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hub.service.broadcasts_dropped(), 1);
    }
}
