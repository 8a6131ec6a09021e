pub mod poll;
pub mod session;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use unified::action::{ControlAction, ControlResult};
use unified::api::{Capability, Entity, EntityState, EntityType, Room};
use unified::health::{AdapterHealth, AdapterMetrics, AdapterStatus};
use unified::source::SourceKind;

use crate::error::HubResult;

/// Entities produced by one sync pass. A sync may succeed partially:
/// malformed upstream payloads are skipped and reported here instead of
/// aborting the whole pass.
#[derive(Debug, Default, Clone)]
pub struct SyncBatch {
    pub entities: Vec<Entity>,
    pub errors: Vec<String>,
}

impl SyncBatch {
    #[must_use]
    pub fn from_entities(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            errors: Vec::new(),
        }
    }
}

/// The contract every source adapter satisfies. Adapters bridge one
/// external source into the unified type system; they are compiled in and
/// registered with the [`crate::registry::AdapterRegistry`].
///
/// Deadlines are enforced by the caller (the service wraps adapter calls
/// in `tokio::time::timeout`); long-running internal loops terminate via
/// the cancellation scope handed to them at connect time.
#[async_trait]
pub trait Adapter: Send + Sync {
    /* identification */
    fn id(&self) -> &str;
    fn source_kind(&self) -> SourceKind;
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /* lifecycle */

    /// Authenticate and start internal loops. Fails with a typed error if
    /// the upstream is unreachable.
    async fn connect(&self) -> HubResult<()>;

    /// Stop loops and close connections. Idempotent.
    async fn disconnect(&self) -> HubResult<()>;

    fn is_connected(&self) -> bool;
    fn status(&self) -> AdapterStatus;

    /* sync */

    /// Pull the current entity set from the upstream, translated into the
    /// unified type system.
    async fn sync_entities(&self) -> HubResult<SyncBatch>;

    async fn sync_rooms(&self) -> HubResult<Vec<Room>> {
        Ok(Vec::new())
    }

    fn last_sync_time(&self) -> Option<DateTime<Utc>>;

    /* action execution */

    /// Translate a unified action into the source-specific operation and
    /// run it. Never panics through; failures come back as a populated
    /// `ControlResult::error` (unknown actions included).
    async fn execute_action(&self, action: &ControlAction) -> ControlResult;

    /* capability advertisement */

    fn supported_entity_types(&self) -> &[EntityType];
    fn supported_capabilities(&self) -> &[Capability];

    /// True if the adapter pushes events into the ingress rather than
    /// relying on polling alone.
    fn supports_realtime(&self) -> bool {
        false
    }

    /* observability */

    async fn health(&self) -> AdapterHealth;

    /// Live metrics, if the adapter can produce them right now. `None`
    /// lets the registry fall back to its stored snapshot.
    async fn metrics(&self) -> Option<AdapterMetrics>;
}

impl std::fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("id", &self.id())
            .field("source_kind", &self.source_kind())
            .finish()
    }
}

/// The single service-side hook adapters invoke when they observe a state
/// change they did not initiate (pushed events, poll deltas).
#[async_trait]
pub trait StateIngress: Send + Sync {
    async fn update_entity_state(
        &self,
        entity_id: &str,
        new_state: EntityState,
        source: SourceKind,
    ) -> HubResult<()>;

    async fn handle_external_state_change(
        &self,
        entity_id: &str,
        new_state: EntityState,
        source: SourceKind,
        metadata: BTreeMap<String, Value>,
    ) -> HubResult<()>;
}
