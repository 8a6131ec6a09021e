use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use unified::api::{Entity, EntityType};
use unified::source::SourceKind;

use crate::error::{HubError, HubResult};

struct Inner {
    entities: HashMap<String, Entity>,
    by_type: HashMap<EntityType, Vec<String>>,
    by_source: HashMap<SourceKind, Vec<String>>,
    by_room: HashMap<String, Vec<String>>,
    last_access: HashMap<String, Instant>,
    last_cleanup: Instant,
}

/// In-memory entity store with secondary indexes by type, source and room,
/// and an LRU sweep that bounds memory under sustained registration.
pub struct EntityRegistry {
    max_entities: usize,
    cleanup_interval: Duration,
    inner: RwLock<Inner>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTITIES, Self::DEFAULT_CLEANUP_INTERVAL)
    }
}

impl EntityRegistry {
    pub const DEFAULT_MAX_ENTITIES: usize = 500;
    pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn new(max_entities: usize, cleanup_interval: Duration) -> Self {
        Self {
            max_entities,
            cleanup_interval,
            inner: RwLock::new(Inner {
                entities: HashMap::new(),
                by_type: HashMap::new(),
                by_source: HashMap::new(),
                by_room: HashMap::new(),
                last_access: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Register a new entity, or update it in place when re-registered
    /// from the same source. A different source for a known id is
    /// rejected; the service layer runs the conflict resolver first.
    pub async fn register(&self, entity: Entity) -> HubResult<()> {
        if entity.id.is_empty() {
            return Err(HubError::EmptyEntityId);
        }
        entity.validate()?;

        let mut inner = self.inner.write().await;

        if inner.entities.len() >= self.max_entities
            || inner.last_cleanup.elapsed() > self.cleanup_interval
        {
            self.cleanup(&mut inner);
        }

        if let Some(existing_source) = inner.entities.get(&entity.id).map(Entity::source) {
            if existing_source == entity.source() {
                Self::update_locked(&mut inner, entity);
                return Ok(());
            }
            return Err(HubError::AlreadyRegistered(entity.id.clone(), existing_source));
        }

        if inner.entities.len() >= self.max_entities {
            return Err(HubError::RegistryFull(self.max_entities));
        }

        let id = entity.id.clone();
        inner
            .by_type
            .entry(entity.entity_type())
            .or_default()
            .push(id.clone());
        inner
            .by_source
            .entry(entity.source())
            .or_default()
            .push(id.clone());
        if let Some(room) = entity.room_id.clone() {
            inner.by_room.entry(room).or_default().push(id.clone());
        }
        inner.last_access.insert(id.clone(), Instant::now());
        inner.entities.insert(id, entity);
        Ok(())
    }

    /// Replace a stored entity, reindexing room membership when it moved.
    pub async fn update(&self, entity: Entity) -> HubResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.entities.contains_key(&entity.id) {
            return Err(HubError::EntityNotFound(entity.id));
        }
        Self::update_locked(&mut inner, entity);
        Ok(())
    }

    fn update_locked(inner: &mut Inner, entity: Entity) {
        let id = entity.id.clone();
        let old_room = inner
            .entities
            .get(&id)
            .and_then(|existing| existing.room_id.clone());

        if old_room != entity.room_id {
            if let Some(room) = &old_room {
                Self::remove_from_index(&mut inner.by_room, room, &id);
            }
            if let Some(room) = entity.room_id.clone() {
                inner.by_room.entry(room).or_default().push(id.clone());
            }
        }

        // source and type are stable across updates; only the room moves
        inner.last_access.insert(id.clone(), Instant::now());
        inner.entities.insert(id, entity);
    }

    pub async fn unregister(&self, id: &str) -> HubResult<Entity> {
        let mut inner = self.inner.write().await;
        Self::remove_locked(&mut inner, id).ok_or_else(|| HubError::EntityNotFound(id.to_string()))
    }

    fn remove_locked(inner: &mut Inner, id: &str) -> Option<Entity> {
        let entity = inner.entities.remove(id)?;
        Self::remove_from_index_key(&mut inner.by_type, &entity.entity_type(), id);
        Self::remove_from_index_key(&mut inner.by_source, &entity.source(), id);
        if let Some(room) = &entity.room_id {
            Self::remove_from_index(&mut inner.by_room, room, id);
        }
        inner.last_access.remove(id);
        Some(entity)
    }

    fn remove_from_index(index: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
        if let Some(ids) = index.get_mut(key) {
            ids.retain(|held| held != id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }

    fn remove_from_index_key<K: std::hash::Hash + Eq>(
        index: &mut HashMap<K, Vec<String>>,
        key: &K,
        id: &str,
    ) {
        if let Some(ids) = index.get_mut(key) {
            ids.retain(|held| held != id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }

    /// Evict every entity idle longer than the cleanup interval.
    fn cleanup(&self, inner: &mut Inner) {
        let stale = inner
            .last_access
            .iter()
            .filter(|(_, at)| at.elapsed() > self.cleanup_interval)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        if !stale.is_empty() {
            log::debug!("Entity registry sweep evicting {} idle entities", stale.len());
        }
        for id in stale {
            Self::remove_locked(inner, &id);
        }
        inner.last_cleanup = Instant::now();
    }

    /// Lookup by id. Takes the write lock: a hit refreshes the entity's
    /// LRU timestamp.
    pub async fn by_id(&self, id: &str) -> Option<Entity> {
        let mut inner = self.inner.write().await;
        let entity = inner.entities.get(id).cloned()?;
        inner.last_access.insert(id.to_string(), Instant::now());
        Some(entity)
    }

    pub async fn by_type(&self, ty: EntityType) -> Vec<Entity> {
        let inner = self.inner.read().await;
        Self::collect_ids(&inner, inner.by_type.get(&ty))
    }

    pub async fn by_source(&self, source: SourceKind) -> Vec<Entity> {
        let inner = self.inner.read().await;
        Self::collect_ids(&inner, inner.by_source.get(&source))
    }

    pub async fn by_room(&self, room_id: &str) -> Vec<Entity> {
        let inner = self.inner.read().await;
        Self::collect_ids(&inner, inner.by_room.get(room_id))
    }

    fn collect_ids(inner: &Inner, ids: Option<&Vec<String>>) -> Vec<Entity> {
        ids.map_or_else(Vec::new, |ids| {
            ids.iter()
                .filter_map(|id| inner.entities.get(id).cloned())
                .collect()
        })
    }

    pub async fn all(&self) -> Vec<Entity> {
        self.inner.read().await.entities.values().cloned().collect()
    }

    /// Case-insensitive substring match on id and friendly name. An empty
    /// query returns everything.
    pub async fn search(&self, query: &str) -> Vec<Entity> {
        let needle = query.to_lowercase();
        self.inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| {
                needle.is_empty()
                    || e.id.to_lowercase().contains(&needle)
                    || e.friendly_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub async fn available_only(&self) -> Vec<Entity> {
        self.inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.available)
            .cloned()
            .collect()
    }

    pub async fn counts_by_type(&self) -> HashMap<EntityType, usize> {
        self.inner
            .read()
            .await
            .by_type
            .iter()
            .map(|(ty, ids)| (*ty, ids.len()))
            .collect()
    }

    pub async fn counts_by_source(&self) -> HashMap<SourceKind, usize> {
        self.inner
            .read()
            .await
            .by_source
            .iter()
            .map(|(source, ids)| (*source, ids.len()))
            .collect()
    }

    pub async fn ids_for_source(&self, source: SourceKind) -> Vec<String> {
        self.inner
            .read()
            .await
            .by_source
            .get(&source)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unified::api::{Entity, EntityDetail, EntityMetadata, EntityState, EntityType, LightDetail};
    use unified::source::SourceKind;

    use super::EntityRegistry;
    use crate::error::HubError;

    fn light(id: &str, source: SourceKind) -> Entity {
        Entity::new(
            id,
            id,
            EntityState::Off,
            EntityDetail::Light(LightDetail::default()),
            EntityMetadata::new(source, id),
        )
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new(10, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn register_then_lookup_everywhere() {
        let reg = registry();
        let entity = light("light.kitchen", SourceKind::HomeAutomation).with_room("kitchen");
        reg.register(entity).await.unwrap();

        assert!(reg.by_id("light.kitchen").await.is_some());
        assert_eq!(reg.by_type(EntityType::Light).await.len(), 1);
        assert_eq!(reg.by_source(SourceKind::HomeAutomation).await.len(), 1);
        assert_eq!(reg.by_room("kitchen").await.len(), 1);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn empty_id_rejected() {
        let reg = registry();
        let entity = light("", SourceKind::HomeAutomation);
        assert!(matches!(
            reg.register(entity).await.unwrap_err(),
            HubError::EmptyEntityId
        ));
    }

    #[tokio::test]
    async fn same_source_reregistration_updates_in_place() {
        let reg = registry();
        reg.register(light("light.kitchen", SourceKind::HomeAutomation))
            .await
            .unwrap();

        let mut updated = light("light.kitchen", SourceKind::HomeAutomation);
        updated.state = EntityState::On;
        reg.register(updated).await.unwrap();

        assert_eq!(reg.len().await, 1);
        assert_eq!(
            reg.by_id("light.kitchen").await.unwrap().state,
            EntityState::On
        );
    }

    #[tokio::test]
    async fn different_source_rejected() {
        let reg = registry();
        reg.register(light("light.kitchen", SourceKind::HomeAutomation))
            .await
            .unwrap();

        let err = reg
            .register(light("light.kitchen", SourceKind::SmartRelay))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::AlreadyRegistered(_, SourceKind::HomeAutomation)
        ));
    }

    #[tokio::test]
    async fn update_reindexes_room_change() {
        let reg = registry();
        reg.register(light("light.a", SourceKind::HomeAutomation).with_room("kitchen"))
            .await
            .unwrap();

        let moved = light("light.a", SourceKind::HomeAutomation).with_room("hall");
        reg.update(moved).await.unwrap();

        assert!(reg.by_room("kitchen").await.is_empty());
        assert_eq!(reg.by_room("hall").await.len(), 1);
    }

    #[tokio::test]
    async fn unregister_clears_every_index() {
        let reg = registry();
        reg.register(light("light.a", SourceKind::HomeAutomation).with_room("kitchen"))
            .await
            .unwrap();

        reg.unregister("light.a").await.unwrap();
        assert!(reg.by_id("light.a").await.is_none());
        assert!(reg.by_type(EntityType::Light).await.is_empty());
        assert!(reg.by_source(SourceKind::HomeAutomation).await.is_empty());
        assert!(reg.by_room("kitchen").await.is_empty());
        assert!(reg.is_empty().await);

        // register → unregister → register round-trips
        reg.register(light("light.a", SourceKind::HomeAutomation))
            .await
            .unwrap();
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn search_matches_id_and_name() {
        let reg = registry();
        let mut entity = light("light.kitchen", SourceKind::HomeAutomation);
        entity.friendly_name = "Ceiling lamp".to_string();
        reg.register(entity).await.unwrap();
        reg.register(light("switch.garage", SourceKind::SmartRelay))
            .await
            .unwrap();

        assert_eq!(reg.search("KITCHEN").await.len(), 1);
        assert_eq!(reg.search("ceiling").await.len(), 1);
        assert_eq!(reg.search("").await.len(), 2);
        assert!(reg.search("basement").await.is_empty());
    }

    #[tokio::test]
    async fn full_registry_rejects_when_nothing_evictable() {
        let reg = EntityRegistry::new(2, Duration::from_secs(3600));
        reg.register(light("a", SourceKind::HomeAutomation))
            .await
            .unwrap();
        reg.register(light("b", SourceKind::HomeAutomation))
            .await
            .unwrap();

        let err = reg
            .register(light("c", SourceKind::HomeAutomation))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::RegistryFull(2)));
    }

    #[tokio::test]
    async fn idle_entities_evicted_under_pressure() {
        // zero interval: everything is immediately idle and evictable
        let reg = EntityRegistry::new(2, Duration::ZERO);
        reg.register(light("a", SourceKind::HomeAutomation))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.register(light("b", SourceKind::HomeAutomation))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // capacity pressure triggers the sweep, evicting the idle entries
        reg.register(light("c", SourceKind::HomeAutomation))
            .await
            .unwrap();
        assert!(reg.by_id("c").await.is_some());
        assert!(reg.len().await <= 2);
    }

    #[tokio::test]
    async fn every_listed_entity_resolves_by_id() {
        let reg = registry();
        for id in ["light.a", "light.b", "light.c"] {
            reg.register(light(id, SourceKind::HomeAutomation))
                .await
                .unwrap();
        }

        for entity in reg.all().await {
            let found = reg.by_id(&entity.id).await.unwrap();
            assert_eq!(found.id, entity.id);
        }
    }

    #[tokio::test]
    async fn counts_match_indexes() {
        let reg = registry();
        reg.register(light("a", SourceKind::HomeAutomation))
            .await
            .unwrap();
        reg.register(light("b", SourceKind::SmartRelay))
            .await
            .unwrap();

        let by_type = reg.counts_by_type().await;
        assert_eq!(by_type[&EntityType::Light], 2);
        let by_source = reg.counts_by_source().await;
        assert_eq!(by_source[&SourceKind::HomeAutomation], 1);
        assert_eq!(by_source[&SourceKind::SmartRelay], 1);
    }
}
