use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast::{Receiver, Sender};

use unified::api::{Entity, EntityState};
use unified::event::EventBlock;
use unified::health::{AdapterHealth, AdapterMetrics, AdapterStatus};
use unified::source::SourceKind;
use unified::sync::SyncStatus;

/// Provenance of a state change handed to the emitter.
#[derive(Clone, Debug, Default)]
pub struct StateChangeContext {
    pub source: Option<SourceKind>,
    pub external: bool,
    pub metadata: BTreeMap<String, Value>,
}

impl StateChangeContext {
    #[must_use]
    pub fn internal(source: SourceKind) -> Self {
        Self {
            source: Some(source),
            external: false,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn external(source: SourceKind, metadata: BTreeMap<String, Value>) -> Self {
        Self {
            source: Some(source),
            external: true,
            metadata,
        }
    }
}

/// One-way outbound broadcast sink. Implementations must be non-blocking
/// from the caller's point of view (enqueue or drop internally); the core
/// treats every call as fire-and-forget.
pub trait EventEmitter: Send + Sync {
    fn on_entity_state_change(
        &self,
        entity_id: &str,
        old_state: EntityState,
        new_state: EntityState,
        context: StateChangeContext,
    );

    fn on_entity_added(&self, entity: &Entity);

    fn on_entity_removed(&self, entity_id: &str, source: SourceKind);

    fn on_sync_status(&self, source: SourceKind, status: SyncStatus, detail: Option<String>);

    fn on_adapter_status(
        &self,
        adapter_id: &str,
        name: &str,
        source: SourceKind,
        status: AdapterStatus,
        health: &AdapterHealth,
        metrics: &AdapterMetrics,
    );
}

struct StreamState {
    prev_ts: i64,
    idx: i32,
    buffer: VecDeque<(String, Arc<EventBlock>)>,
    dropped: u64,
}

/// Broadcast-channel backed [`EventEmitter`] with a bounded replay buffer.
/// Subscribers that fall behind lose events; the stream never blocks the
/// core.
pub struct EventStream {
    updates: Sender<(String, Arc<EventBlock>)>,
    state: Mutex<StreamState>,
    capacity: usize,
}

impl EventStream {
    const CHANNEL_SIZE: usize = 32;
    pub const DEFAULT_BUFFER_SIZE: usize = 128;

    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            updates: Sender::new(Self::CHANNEL_SIZE),
            state: Mutex::new(StreamState {
                prev_ts: Utc::now().timestamp(),
                idx: 0,
                buffer: VecDeque::with_capacity(buffer_capacity),
                dropped: 0,
            }),
            capacity: buffer_capacity,
        }
    }

    pub fn publish(&self, block: EventBlock) {
        let block = Arc::new(block);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let id = Self::generate_event_id(&mut state);
        if state.buffer.len() == self.capacity {
            state.buffer.pop_front();
        }
        state.buffer.push_back((id.clone(), block.clone()));
        drop(state);

        if let Err(err) = self.updates.send((id, block)) {
            log::trace!("Overflow on hub event pipe: {err}");
        }
    }

    fn generate_event_id(state: &mut StreamState) -> String {
        let ts = Utc::now().timestamp();
        if ts == state.prev_ts {
            state.idx += 1;
        } else {
            state.idx = 0;
            state.prev_ts = ts;
        }
        format!("{}:{}", ts, state.idx)
    }

    /// Buffered events strictly after the given id; the full buffer when
    /// the id has already been rotated out.
    #[must_use]
    pub fn events_sent_after(&self, id: &str) -> Vec<(String, Arc<EventBlock>)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events = state.buffer.iter().skip_while(|(evt_id, _)| evt_id != id);
        match events.next() {
            Some(_) => events.cloned().collect(),
            None => state.buffer.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> Receiver<(String, Arc<EventBlock>)> {
        self.updates.subscribe()
    }

    /// How many broadcasts were dropped by the service-side rate limiter.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }

    pub fn note_dropped(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped += 1;
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUFFER_SIZE)
    }
}

impl EventEmitter for EventStream {
    fn on_entity_state_change(
        &self,
        entity_id: &str,
        old_state: EntityState,
        new_state: EntityState,
        context: StateChangeContext,
    ) {
        let source = context.source.unwrap_or(SourceKind::Virtual);
        let block = if context.external {
            EventBlock::external_state_change(
                entity_id,
                old_state,
                new_state,
                source,
                context.metadata,
            )
        } else {
            EventBlock::state_change(entity_id, old_state, new_state, source)
        };
        self.publish(block);
    }

    fn on_entity_added(&self, entity: &Entity) {
        self.publish(EventBlock::entity_added(entity.clone()));
    }

    fn on_entity_removed(&self, entity_id: &str, source: SourceKind) {
        self.publish(EventBlock::entity_removed(entity_id, source));
    }

    fn on_sync_status(&self, source: SourceKind, status: SyncStatus, detail: Option<String>) {
        self.publish(EventBlock::sync_status(source, status, detail));
    }

    fn on_adapter_status(
        &self,
        adapter_id: &str,
        name: &str,
        source: SourceKind,
        status: AdapterStatus,
        health: &AdapterHealth,
        metrics: &AdapterMetrics,
    ) {
        self.publish(EventBlock::new(unified::event::HubEvent::AdapterStatus {
            adapter_id: adapter_id.to_string(),
            name: name.to_string(),
            source,
            status,
            health: health.clone(),
            metrics: metrics.clone(),
        }));
    }
}
