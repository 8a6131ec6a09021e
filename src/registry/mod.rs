pub mod adapters;
pub mod conflict;
pub mod entities;
pub mod priority;

pub use adapters::AdapterRegistry;
pub use conflict::ConflictResolver;
pub use entities::EntityRegistry;
pub use priority::SourcePriorityManager;

use std::sync::Arc;

use crate::config::RegistryConfig;

/// The registry layer as one bundle: adapters, entities, source
/// priorities and the conflict resolver built on top of them.
pub struct RegistryManager {
    pub adapters: AdapterRegistry,
    pub entities: EntityRegistry,
    pub priorities: Arc<SourcePriorityManager>,
    pub resolver: ConflictResolver,
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

impl RegistryManager {
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        let priorities = Arc::new(SourcePriorityManager::new());
        Self {
            adapters: AdapterRegistry::new(),
            entities: EntityRegistry::new(config.max_entities, config.cleanup_interval()),
            resolver: ConflictResolver::new(priorities.clone()),
            priorities,
        }
    }
}
