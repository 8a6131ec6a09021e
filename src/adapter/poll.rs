use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::select;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use unified::api::{Entity, EntityState};
use unified::source::SourceKind;

use crate::adapter::StateIngress;
use crate::config::AdapterConfig;
use crate::error::HubResult;

/// A state-change event as reported by an upstream. Upstream event ids are
/// monotonically increasing, which lets the loop skip already-seen events
/// across polls.
#[derive(Clone, Debug)]
pub struct UpstreamEvent {
    pub id: u64,
    pub entity_id: String,
    pub new_state: EntityState,
    /// True for changes not initiated through the hub (physical switches).
    pub external: bool,
    pub metadata: BTreeMap<String, Value>,
}

/// What a poll-driven adapter must supply: the two fetches the loops run.
#[async_trait]
pub trait PollSource: Send + Sync {
    fn source_kind(&self) -> SourceKind;

    /// Full device-state fetch (coarse poll).
    async fn poll_state(&self) -> HubResult<Vec<Entity>>;

    /// Incremental event fetch (fine poll); `after` is the last event id
    /// already processed.
    async fn poll_events(&self, after: Option<u64>) -> HubResult<Vec<UpstreamEvent>>;
}

#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub state_interval: Duration,
    pub event_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            state_interval: Duration::from_secs(300),
            event_interval: Duration::from_secs(30),
        }
    }
}

impl From<&AdapterConfig> for PollConfig {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            state_interval: config.state_poll_interval(),
            event_interval: config.event_poll_interval(),
        }
    }
}

/// Exponential backoff for transient upstream failures: starts at 10s,
/// doubles per failure, capped at the owning loop's poll interval, with a
/// little jitter so a fleet of adapters doesn't retry in lockstep.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_secs(10);

    fn new(cap: Duration) -> Self {
        let initial = Self::INITIAL.min(cap);
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        let jitter = rand::rng().random_range(0.8..1.2);
        delay.mul_f64(jitter)
    }
}

/// Handle to a running pair of poll loops. Dropping the handle leaves the
/// loops running; call [`PollHandle::stop`] to terminate them.
pub struct PollHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PollHandle {
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Spawn the two poll loops for one adapter: a coarse device-state poll
/// and a fine event poll. Both terminate through the returned handle and
/// survive panics in individual ticks.
#[must_use]
pub fn spawn(
    driver: Arc<dyn PollSource>,
    ingress: Arc<dyn StateIngress>,
    config: PollConfig,
) -> PollHandle {
    let token = CancellationToken::new();

    let snapshot: Arc<Mutex<HashMap<String, EntityState>>> = Arc::new(Mutex::new(HashMap::new()));
    let last_event_id: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

    let state_task = tokio::spawn(run_loop(
        token.child_token(),
        config.state_interval,
        "state",
        driver.clone(),
        {
            let ingress = ingress.clone();
            move |driver: Arc<dyn PollSource>| {
                let snapshot = snapshot.clone();
                let ingress = ingress.clone();
                async move { state_tick(&*driver, &snapshot, &*ingress).await }
            }
        },
    ));

    let event_task = tokio::spawn(run_loop(
        token.child_token(),
        config.event_interval,
        "event",
        driver,
        move |driver: Arc<dyn PollSource>| {
            let last_event_id = last_event_id.clone();
            let ingress = ingress.clone();
            async move { event_tick(&*driver, &last_event_id, &*ingress).await }
        },
    ));

    PollHandle {
        token,
        tasks: vec![state_task, event_task],
    }
}

async fn run_loop<F, Fut>(
    token: CancellationToken,
    interval: Duration,
    label: &'static str,
    driver: Arc<dyn PollSource>,
    tick: F,
) where
    F: Fn(Arc<dyn PollSource>) -> Fut + Send + 'static,
    Fut: Future<Output = HubResult<()>> + Send + 'static,
{
    let source = driver.source_kind();
    let mut backoff = Backoff::new(interval);
    let mut delay = Duration::ZERO;

    loop {
        select! {
            () = token.cancelled() => break,
            () = sleep(delay) => {}
        }

        // each tick runs in its own task: a panicking tick is logged and
        // the loop continues on the next interval
        let fut = tick(driver.clone());
        match tokio::spawn(fut).await {
            Ok(Ok(())) => {
                backoff.reset();
                delay = interval;
            }
            Ok(Err(err)) => {
                delay = backoff.next();
                log::warn!("[{source}] {label} poll failed: {err}; retrying in {delay:?}");
            }
            Err(err) if err.is_panic() => {
                delay = interval;
                log::error!("[{source}] {label} poll tick panicked; continuing");
            }
            Err(_) => break,
        }
    }

    log::debug!("[{source}] {label} poll loop stopped");
}

/// One coarse poll: fetch everything, diff against the held snapshot, and
/// push only the differences into the service ingress.
async fn state_tick(
    driver: &dyn PollSource,
    snapshot: &Mutex<HashMap<String, EntityState>>,
    ingress: &dyn StateIngress,
) -> HubResult<()> {
    let entities = driver.poll_state().await?;
    let source = driver.source_kind();

    let mut snapshot = snapshot.lock().await;
    let mut next = HashMap::with_capacity(entities.len());

    for entity in entities {
        let changed = snapshot.get(&entity.id) != Some(&entity.state);
        next.insert(entity.id.clone(), entity.state);
        if changed {
            if let Err(err) = ingress
                .update_entity_state(&entity.id, entity.state, source)
                .await
            {
                log::warn!("[{source}] ingress rejected {}: {err}", entity.id);
            }
        }
    }

    *snapshot = next;
    Ok(())
}

/// One fine poll: fetch events after the last seen id, skip anything
/// already processed, and forward the rest.
async fn event_tick(
    driver: &dyn PollSource,
    last_event_id: &Mutex<Option<u64>>,
    ingress: &dyn StateIngress,
) -> HubResult<()> {
    let mut last_id = last_event_id.lock().await;
    let events = driver.poll_events(*last_id).await?;
    let source = driver.source_kind();

    for event in events {
        if last_id.is_some_and(|seen| event.id <= seen) {
            continue;
        }
        *last_id = Some(event.id);

        let result = if event.external {
            ingress
                .handle_external_state_change(
                    &event.entity_id,
                    event.new_state,
                    source,
                    event.metadata,
                )
                .await
        } else {
            ingress
                .update_entity_state(&event.entity_id, event.new_state, source)
                .await
        };
        if let Err(err) = result {
            log::warn!("[{source}] ingress rejected event {}: {err}", event.id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use unified::api::{Entity, EntityDetail, EntityMetadata, EntityState, LightDetail};
    use unified::source::SourceKind;

    use super::{PollConfig, PollSource, UpstreamEvent, spawn};
    use crate::adapter::StateIngress;
    use crate::error::HubResult;

    fn light(id: &str, state: EntityState) -> Entity {
        Entity::new(
            id,
            id,
            state,
            EntityDetail::Light(LightDetail::default()),
            EntityMetadata::new(SourceKind::SmartRelay, id),
        )
    }

    #[derive(Default)]
    struct RecordingIngress {
        updates: Mutex<Vec<(String, EntityState)>>,
        external: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StateIngress for RecordingIngress {
        async fn update_entity_state(
            &self,
            entity_id: &str,
            new_state: EntityState,
            _source: SourceKind,
        ) -> HubResult<()> {
            self.updates
                .lock()
                .await
                .push((entity_id.to_string(), new_state));
            Ok(())
        }

        async fn handle_external_state_change(
            &self,
            entity_id: &str,
            _new_state: EntityState,
            _source: SourceKind,
            _metadata: BTreeMap<String, serde_json::Value>,
        ) -> HubResult<()> {
            self.external.lock().await.push(entity_id.to_string());
            Ok(())
        }
    }

    struct ScriptedSource {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl PollSource for ScriptedSource {
        fn source_kind(&self) -> SourceKind {
            SourceKind::SmartRelay
        }

        async fn poll_state(&self) -> HubResult<Vec<Entity>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            // first poll: off; every later poll: on (one transition)
            let state = if n == 0 {
                EntityState::Off
            } else {
                EntityState::On
            };
            Ok(vec![light("relay-1", state)])
        }

        async fn poll_events(&self, _after: Option<u64>) -> HubResult<Vec<UpstreamEvent>> {
            // same two events every poll; the loop must dedup by id
            Ok(vec![
                UpstreamEvent {
                    id: 1,
                    entity_id: "relay-1".to_string(),
                    new_state: EntityState::On,
                    external: false,
                    metadata: BTreeMap::new(),
                },
                UpstreamEvent {
                    id: 2,
                    entity_id: "relay-1".to_string(),
                    new_state: EntityState::Off,
                    external: true,
                    metadata: BTreeMap::new(),
                },
            ])
        }
    }

    #[tokio::test]
    async fn state_deltas_and_event_dedup() {
        let ingress = Arc::new(RecordingIngress::default());
        let driver = Arc::new(ScriptedSource {
            polls: AtomicUsize::new(0),
        });

        let handle = spawn(
            driver,
            ingress.clone(),
            PollConfig {
                state_interval: Duration::from_millis(10),
                event_interval: Duration::from_millis(10),
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        // state poll: one initial Off, one Off->On transition, then silence
        let updates = ingress.updates.lock().await;
        let state_updates = updates
            .iter()
            .filter(|(_, s)| *s == EntityState::Off || *s == EntityState::On)
            .count();
        assert!(state_updates >= 2, "expected initial + transition");

        // event poll repeats ids 1 and 2 forever, but each reaches the
        // ingress exactly once
        let external = ingress.external.lock().await;
        assert_eq!(external.len(), 1);
    }

    #[tokio::test]
    async fn stop_terminates_loops() {
        let ingress = Arc::new(RecordingIngress::default());
        let driver = Arc::new(ScriptedSource {
            polls: AtomicUsize::new(0),
        });

        let handle = spawn(driver, ingress.clone(), PollConfig::default());
        handle.stop().await;

        let count = ingress.updates.lock().await.len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ingress.updates.lock().await.len(), count);
    }
}
