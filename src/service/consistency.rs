use std::collections::HashMap;

use serde::Serialize;

use unified::source::SourceKind;

use crate::service::UnifiedEntityService;

/// What a consistency pass found wrong with the registry contents.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsistencyReport {
    /// Non-virtual entities whose source has no registered adapter.
    pub orphaned: Vec<String>,
    /// Virtual entities whose recorded primary source is missing from
    /// their contributing-source list, or whose list is empty.
    pub invalid_virtual: Vec<String>,
    /// Upstream ids reported by more than one source without having been
    /// through conflict resolution yet.
    pub unresolved_duplicates: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
            && self.invalid_virtual.is_empty()
            && self.unresolved_duplicates.is_empty()
    }
}

impl UnifiedEntityService {
    /// Inspect every registered entity for invariant violations. Run
    /// periodically by operators; mutates nothing.
    pub async fn validate_consistency(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let entities = self.registries.entities.all().await;

        let mut upstream_owners: HashMap<String, Vec<SourceKind>> = HashMap::new();

        for entity in &entities {
            let meta = &entity.metadata;

            if meta.is_virtual {
                let primary = meta
                    .source_data
                    .get("primary_source")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<SourceKind>().ok());

                let valid = match primary {
                    Some(primary) => meta.virtual_sources.contains(&primary),
                    None => false,
                };
                if !valid || meta.virtual_sources.is_empty() {
                    report.invalid_virtual.push(entity.id.clone());
                }
                continue;
            }

            if self
                .registries
                .adapters
                .get_by_source(meta.source)
                .await
                .is_none()
            {
                report.orphaned.push(entity.id.clone());
            }

            upstream_owners
                .entry(meta.source_entity_id.clone())
                .or_default()
                .push(meta.source);
        }

        for (upstream_id, sources) in upstream_owners {
            if sources.len() > 1 {
                report.unresolved_duplicates.push(upstream_id);
            }
        }

        if !report.is_clean() {
            log::warn!(
                "Consistency check: {} orphaned, {} invalid virtual, {} unresolved duplicates",
                report.orphaned.len(),
                report.invalid_virtual.len(),
                report.unresolved_duplicates.len()
            );
        }
        report
    }
}
