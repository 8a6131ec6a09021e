//! Shared fixtures for the service test suite: a mock adapter, a
//! recording emitter, and a fully wired hub.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use unified::action::{ControlAction, ControlError, ControlResult};
use unified::api::{
    Capability, Entity, EntityDetail, EntityMetadata, EntityState, EntityType, LightDetail,
    SwitchDetail,
};
use unified::health::{AdapterHealth, AdapterMetrics, AdapterStatus};
use unified::source::SourceKind;
use unified::sync::SyncStatus;

use crate::adapter::{Adapter, SyncBatch};
use crate::cache::MemoryEntityCache;
use crate::config::HubConfig;
use crate::error::HubResult;
use crate::events::{EventEmitter, StateChangeContext};
use crate::registry::RegistryManager;
use crate::rooms::RoomDirectory;
use crate::service::UnifiedEntityService;

pub(crate) fn light(id: &str, source: SourceKind, state: EntityState) -> Entity {
    Entity::new(
        id,
        id,
        state,
        EntityDetail::Light(LightDetail::default()),
        EntityMetadata::new(source, id),
    )
}

pub(crate) fn switch(id: &str, source: SourceKind, state: EntityState) -> Entity {
    Entity::new(
        id,
        id,
        state,
        EntityDetail::Switch(SwitchDetail::default()),
        EntityMetadata::new(source, id),
    )
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Recorded {
    StateChange {
        entity_id: String,
        old_state: EntityState,
        new_state: EntityState,
        external: bool,
    },
    Added(String),
    Removed(String),
    Sync(SourceKind, SyncStatus),
    AdapterStatus(String),
}

#[derive(Default)]
pub(crate) struct RecordingEmitter {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingEmitter {
    pub fn all(&self) -> Vec<Recorded> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state_changes(&self) -> Vec<Recorded> {
        self.all()
            .into_iter()
            .filter(|e| matches!(e, Recorded::StateChange { .. }))
            .collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Removed(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Recorded) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl EventEmitter for RecordingEmitter {
    fn on_entity_state_change(
        &self,
        entity_id: &str,
        old_state: EntityState,
        new_state: EntityState,
        context: StateChangeContext,
    ) {
        self.push(Recorded::StateChange {
            entity_id: entity_id.to_string(),
            old_state,
            new_state,
            external: context.external,
        });
    }

    fn on_entity_added(&self, entity: &Entity) {
        self.push(Recorded::Added(entity.id.clone()));
    }

    fn on_entity_removed(&self, entity_id: &str, _source: SourceKind) {
        self.push(Recorded::Removed(entity_id.to_string()));
    }

    fn on_sync_status(&self, source: SourceKind, status: SyncStatus, _detail: Option<String>) {
        self.push(Recorded::Sync(source, status));
    }

    fn on_adapter_status(
        &self,
        adapter_id: &str,
        _name: &str,
        _source: SourceKind,
        _status: AdapterStatus,
        _health: &AdapterHealth,
        _metrics: &AdapterMetrics,
    ) {
        self.push(Recorded::AdapterStatus(adapter_id.to_string()));
    }
}

pub(crate) struct MockAdapter {
    id: String,
    source: SourceKind,
    connected: AtomicBool,
    pub sync_result: Mutex<Vec<Entity>>,
    pub sync_calls: AtomicUsize,
    pub executed: Mutex<Vec<ControlAction>>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl MockAdapter {
    pub fn new(id: &str, source: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            source,
            connected: AtomicBool::new(true),
            sync_result: Mutex::new(Vec::new()),
            sync_calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            last_sync: Mutex::new(None),
        })
    }

    pub fn set_sync_result(&self, entities: Vec<Entity>) {
        *self
            .sync_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = entities;
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn executed_actions(&self) -> Vec<ControlAction> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_kind(&self) -> SourceKind {
        self.source
    }

    fn name(&self) -> &str {
        "mock adapter"
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    async fn connect(&self) -> HubResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> HubResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> AdapterStatus {
        if self.is_connected() {
            AdapterStatus::Connected
        } else {
            AdapterStatus::Disconnected
        }
    }

    async fn sync_entities(&self) -> HubResult<SyncBatch> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        Ok(SyncBatch::from_entities(
            self.sync_result
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        ))
    }

    fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self
            .last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute_action(&self, action: &ControlAction) -> ControlResult {
        let started = Utc::now();
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action.clone());

        let new_state = match action.action.as_str() {
            "turn_on" => EntityState::On,
            "turn_off" => EntityState::Off,
            "lock" => EntityState::Locked,
            "unlock" => EntityState::Unlocked,
            _ => {
                return ControlResult::fail(
                    ControlError::new("unsupported_action", "mock does not know this action"),
                    started,
                );
            }
        };
        ControlResult::ok(Some(new_state), started)
    }

    fn supported_entity_types(&self) -> &[EntityType] {
        &[EntityType::Light, EntityType::Switch]
    }

    fn supported_capabilities(&self) -> &[Capability] {
        &[Capability::Dimmable]
    }

    async fn health(&self) -> AdapterHealth {
        AdapterHealth::healthy()
    }

    async fn metrics(&self) -> Option<AdapterMetrics> {
        None
    }
}

pub(crate) struct TestHub {
    pub service: Arc<UnifiedEntityService>,
    pub emitter: Arc<RecordingEmitter>,
    pub cache: Arc<MemoryEntityCache>,
    pub rooms: Arc<RoomDirectory>,
}

impl TestHub {
    pub async fn new() -> Self {
        Self::with_config(HubConfig::default()).await
    }

    pub async fn with_config(config: HubConfig) -> Self {
        let emitter = Arc::new(RecordingEmitter::default());
        let cache = Arc::new(MemoryEntityCache::new(Duration::from_secs(60)));
        let rooms = Arc::new(RoomDirectory::new());
        let registries = Arc::new(RegistryManager::default());

        let service = UnifiedEntityService::new(
            config,
            registries,
            emitter.clone(),
            rooms.clone(),
            Some(cache.clone()),
        );

        Self {
            service,
            emitter,
            cache,
            rooms,
        }
    }

    /// Put an entity straight into the registry, bypassing sync.
    pub async fn seed(&self, entity: Entity) {
        self.service
            .registries
            .entities
            .register(entity)
            .await
            .unwrap();
    }

    pub async fn add_adapter(&self, adapter: Arc<MockAdapter>) {
        self.service
            .registries
            .adapters
            .register(adapter)
            .await
            .unwrap();
    }
}
