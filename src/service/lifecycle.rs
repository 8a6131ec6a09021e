use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::adapter::Adapter;
use crate::error::HubResult;
use crate::service::UnifiedEntityService;

impl UnifiedEntityService {
    /// How long an adapter gets to connect or disconnect.
    const LIFECYCLE_DEADLINE: Duration = Duration::from_secs(30);

    /// Register an adapter and bring it up. The adapter stays registered
    /// even when the initial connect fails; its status broadcast tells
    /// subscribers what happened.
    pub async fn register_adapter(&self, adapter: Arc<dyn Adapter>) -> HubResult<()> {
        self.registries.adapters.register(adapter.clone()).await?;
        log::info!(
            "Registered adapter {:?} for source {}",
            adapter.id(),
            adapter.source_kind()
        );

        match timeout(Self::LIFECYCLE_DEADLINE, adapter.connect()).await {
            Ok(Ok(())) => log::info!("Adapter {:?} connected", adapter.id()),
            Ok(Err(err)) => log::error!("Adapter {:?} failed to connect: {err}", adapter.id()),
            Err(_) => log::error!("Adapter {:?} connect timed out", adapter.id()),
        }

        self.broadcast_adapter_status(&adapter).await;
        Ok(())
    }

    /// Tear an adapter down and drop every entity it was the source of.
    pub async fn unregister_adapter(&self, id: &str) -> HubResult<()> {
        let adapter = self.registries.adapters.unregister(id).await?;

        match timeout(Self::LIFECYCLE_DEADLINE, adapter.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("Adapter {id:?} failed to disconnect cleanly: {err}"),
            Err(_) => log::warn!("Adapter {id:?} disconnect timed out"),
        }

        let source = adapter.source_kind();
        for entity_id in self.registries.entities.ids_for_source(source).await {
            if self.registries.entities.unregister(&entity_id).await.is_ok() {
                self.cache_delete(&entity_id).await;
                self.broadcast_guarded(move |emitter| {
                    emitter.on_entity_removed(&entity_id, source);
                });
            }
        }

        self.broadcast_adapter_status(&adapter).await;
        log::info!("Unregistered adapter {id:?}");
        Ok(())
    }

    /// Publish one adapter's status, health and metrics snapshot.
    pub async fn broadcast_adapter_status(&self, adapter: &Arc<dyn Adapter>) {
        let health = adapter.health().await;
        let metrics = match self.registries.adapters.get_metrics(adapter.id()).await {
            Ok(metrics) => metrics,
            // already unregistered: take what the adapter itself reports
            Err(_) => adapter.metrics().await.unwrap_or_default(),
        };

        self.emitter.on_adapter_status(
            adapter.id(),
            adapter.name(),
            adapter.source_kind(),
            adapter.status(),
            &health,
            &metrics,
        );
    }
}
