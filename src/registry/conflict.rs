use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::{Value, json};

use unified::api::{Entity, EntityType};
use unified::source::SourceKind;

use crate::error::{HubError, HubResult};
use crate::registry::priority::SourcePriorityManager;

/// Picks a single winner from N entities that claim the same logical id,
/// and builds merged views of their attributes.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    priorities: Arc<SourcePriorityManager>,
}

/// Sensor readings prefer local, purpose-built sources over aggregators.
const SENSOR_SOURCE_ORDER: [SourceKind; 4] = [
    SourceKind::SmartRelay,
    SourceKind::PowerDaemon,
    SourceKind::HomeAutomation,
    SourceKind::NetworkInventory,
];

impl ConflictResolver {
    #[must_use]
    pub const fn new(priorities: Arc<SourcePriorityManager>) -> Self {
        Self { priorities }
    }

    /// Resolve a conflict set down to one winner. The winner is always an
    /// element of the input.
    pub fn resolve(&self, candidates: Vec<Entity>) -> HubResult<Entity> {
        let mut survivors = self.survivors(candidates)?;

        // total order: priority, then quality, then recency
        survivors.sort_by(|a, b| self.rank(a, b));
        Ok(survivors.remove(0))
    }

    /// The candidates still in the running after availability partitioning
    /// and type-specific source preferences.
    fn survivors(&self, candidates: Vec<Entity>) -> HubResult<Vec<Entity>> {
        if candidates.is_empty() {
            return Err(HubError::UnifiedError(
                unified::error::UnifiedError::NoEntitiesProvided,
            ));
        }
        if candidates.len() == 1 {
            return Ok(candidates);
        }

        // prefer available views; fall back to all if nothing is reachable
        let mut survivors = if candidates.iter().any(|e| e.available) {
            candidates.into_iter().filter(|e| e.available).collect()
        } else {
            candidates
        };

        survivors = Self::apply_type_preference(survivors);
        Ok(survivors)
    }

    /// Cameras trust the camera cloud; sensors trust local hardware first.
    fn apply_type_preference(survivors: Vec<Entity>) -> Vec<Entity> {
        match survivors[0].entity_type() {
            EntityType::Camera => {
                if survivors
                    .iter()
                    .any(|e| e.source() == SourceKind::CameraCloud)
                {
                    return survivors
                        .into_iter()
                        .filter(|e| e.source() == SourceKind::CameraCloud)
                        .collect();
                }
                survivors
            }
            EntityType::Sensor | EntityType::BinarySensor => {
                for preferred in SENSOR_SOURCE_ORDER {
                    if survivors.iter().any(|e| e.source() == preferred) {
                        return survivors
                            .into_iter()
                            .filter(|e| e.source() == preferred)
                            .collect();
                    }
                }
                survivors
            }
            _ => survivors,
        }
    }

    fn rank(&self, a: &Entity, b: &Entity) -> Ordering {
        self.priorities
            .compare(a.source(), b.source())
            .then_with(|| {
                b.metadata
                    .quality_score
                    .partial_cmp(&a.metadata.quality_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.last_updated.cmp(&a.last_updated))
    }

    /// Merge attribute maps across the conflict set. Iterates from the
    /// least-preferred source upward, so higher priority overwrites lower.
    /// `last_updated`/`last_changed` keep the latest timestamp seen and
    /// `quality_score` keeps the maximum, regardless of source priority.
    #[must_use]
    pub fn merge_attributes(&self, entities: &[Entity]) -> BTreeMap<String, Value> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();

        let ordered = entities
            .iter()
            .sorted_by(|a, b| self.rank(*b, *a))
            .collect::<Vec<_>>();

        for entity in ordered {
            for (key, value) in &entity.attributes {
                match key.as_str() {
                    "last_updated" | "last_changed" => {
                        if let Some(existing) = merged.get(key) {
                            if as_timestamp(value) > as_timestamp(existing) {
                                merged.insert(key.clone(), value.clone());
                            }
                        } else {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                    "quality_score" => {
                        let prev = merged.get(key).and_then(Value::as_f64).unwrap_or(0.0);
                        if value.as_f64().unwrap_or(0.0) >= prev {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                    _ => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        merged
    }

    /// Build a composite entity aggregating every source's view. The
    /// primary is re-derived from the candidate set on each call; its
    /// identity is recorded in `source_data`, not pinned.
    pub fn create_virtual(&self, candidates: Vec<Entity>) -> HubResult<Entity> {
        let merged_attributes = self.merge_attributes(&candidates);
        let quality = candidates
            .iter()
            .map(|e| e.metadata.quality_score)
            .fold(0.0_f64, f64::max);
        let sources = candidates
            .iter()
            .map(Entity::source)
            .unique()
            .collect::<Vec<_>>();
        let entity_count = candidates.len();
        let any_available = candidates.iter().any(|e| e.available);

        let mut virtual_entity = self.resolve(candidates)?;
        let primary_source = virtual_entity.source();

        virtual_entity.attributes = merged_attributes;
        virtual_entity.available = any_available;
        virtual_entity.metadata.source = SourceKind::Virtual;
        virtual_entity.metadata.is_virtual = true;
        virtual_entity.metadata.virtual_sources = sources;
        virtual_entity.metadata.quality_score = quality;
        virtual_entity.metadata.last_synced = Utc::now();
        virtual_entity.metadata.source_data = BTreeMap::from([
            (
                "primary_source".to_string(),
                json!(primary_source.as_str()),
            ),
            ("entity_count".to_string(), json!(entity_count)),
            ("created_at".to_string(), json!(Utc::now())),
        ]);

        Ok(virtual_entity)
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}
