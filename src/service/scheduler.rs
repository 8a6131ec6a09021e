use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

use unified::sync::SyncResult;

use crate::service::UnifiedEntityService;

/// Running periodic-sync scheduler: cancel the token, join the task.
pub struct SchedulerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl UnifiedEntityService {
    /// Shorter intervals risk memory pressure from overlapping syncs;
    /// longer ones are presumed misconfiguration.
    const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
    const MAX_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Floor between restarts after a panic in the schedule loop.
    const RESTART_BACKOFF: Duration = Duration::from_secs(30);

    /// Start the periodic full-sync timer. Idempotent: a second call while
    /// running is a no-op.
    pub async fn start_periodic_sync(self: &Arc<Self>) {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            log::debug!("Periodic sync already running");
            return;
        }

        let configured = self.config.sync_interval();
        let period = configured.clamp(Self::MIN_SYNC_INTERVAL, Self::MAX_SYNC_INTERVAL);
        if period != configured {
            log::warn!(
                "Sync interval {configured:?} outside [{:?}, {:?}], clamped to {period:?}",
                Self::MIN_SYNC_INTERVAL,
                Self::MAX_SYNC_INTERVAL
            );
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(supervise(self.clone(), token.child_token(), period));
        *guard = Some(SchedulerHandle { token, task });
        log::info!("Periodic sync scheduled every {period:?}");
    }

    /// Stop the scheduler and wait for it to wind down. Idempotent.
    pub async fn stop_periodic_sync(&self) {
        let handle = self.scheduler.lock().await.take();
        if let Some(handle) = handle {
            handle.token.cancel();
            let _ = handle.task.await;
            log::info!("Periodic sync stopped");
        }
    }

    pub async fn periodic_sync_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }
}

/// Keep the schedule loop alive across panics, restarting it at most once
/// per [`UnifiedEntityService::RESTART_BACKOFF`] while not stopped.
async fn supervise(
    service: Arc<UnifiedEntityService>,
    token: CancellationToken,
    period: Duration,
) {
    loop {
        let run = tokio::spawn(run_schedule(service.clone(), token.clone(), period));
        match run.await {
            Ok(()) => break,
            Err(err) if err.is_panic() && !token.is_cancelled() => {
                log::error!(
                    "Periodic sync loop panicked, restarting in {:?}",
                    UnifiedEntityService::RESTART_BACKOFF
                );
                select! {
                    () = token.cancelled() => break,
                    () = sleep(UnifiedEntityService::RESTART_BACKOFF) => {}
                }
            }
            Err(_) => break,
        }
    }
}

async fn run_schedule(
    service: Arc<UnifiedEntityService>,
    token: CancellationToken,
    period: Duration,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately; the initial sync is the
    // caller's decision, not the scheduler's
    timer.tick().await;

    loop {
        select! {
            () = token.cancelled() => break,
            _ = timer.tick() => {}
        }

        if service.sync_semaphore.available_permits() == 0 {
            log::debug!("Sync capacity saturated, skipping scheduled tick");
            continue;
        }

        let service = service.clone();
        let deadline = service.config.sync_timeout();
        tokio::spawn(async move {
            match timeout(deadline, service.sync_from_all_sources()).await {
                Ok(results) => log_sync_summary(&results),
                Err(_) => log::warn!("Scheduled full sync exceeded its deadline"),
            }
        });
    }
}

fn log_sync_summary(results: &[SyncResult]) {
    if results.is_empty() {
        log::debug!("Scheduled sync ran with no connected adapters");
        return;
    }
    let mut merged = results[0].clone();
    for result in &results[1..] {
        merged.merge(result);
    }
    log::info!(
        "Scheduled sync: {} sources, {} found, {} registered, {} updated, {} removed, {} errors",
        results.len(),
        merged.entities_found,
        merged.entities_registered,
        merged.entities_updated,
        merged.entities_removed,
        merged.errors.len()
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unified::api::EntityState;
    use unified::source::SourceKind;

    use crate::service::testutil::{MockAdapter, TestHub, light};

    #[tokio::test]
    async fn start_stop_is_idempotent() {
        let hub = TestHub::new().await;

        hub.service.start_periodic_sync().await;
        assert!(hub.service.periodic_sync_running().await);

        // second start is a no-op
        hub.service.start_periodic_sync().await;
        assert!(hub.service.periodic_sync_running().await);

        hub.service.stop_periodic_sync().await;
        assert!(!hub.service.periodic_sync_running().await);

        // second stop is a no-op
        hub.service.stop_periodic_sync().await;
        assert!(!hub.service.periodic_sync_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_run_full_syncs() {
        let hub = TestHub::with_config(crate::config::HubConfig {
            // requested below the clamp floor; the scheduler raises it to
            // five minutes
            sync_interval: 60,
            ..crate::config::HubConfig::default()
        })
        .await;
        let adapter = MockAdapter::new("ha", SourceKind::HomeAutomation);
        adapter.set_sync_result(vec![
            light("light.a", SourceKind::HomeAutomation, EntityState::On),
        ]);
        hub.add_adapter(adapter.clone()).await;

        hub.service.start_periodic_sync().await;

        // interval is clamped to 5 minutes; step past two ticks
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        hub.service.stop_periodic_sync().await;

        assert!(adapter.sync_calls() >= 2, "scheduler never ticked");
        assert!(
            hub.service
                .registries()
                .entities
                .by_id("light.a")
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn restart_after_stop_works() {
        let hub = TestHub::new().await;
        hub.service.start_periodic_sync().await;
        hub.service.stop_periodic_sync().await;
        hub.service.start_periodic_sync().await;
        assert!(hub.service.periodic_sync_running().await);
        hub.service.stop_periodic_sync().await;
    }
}
