pub mod action;
pub mod api;
pub mod error;
pub mod event;
pub mod health;
pub mod source;
pub mod sync;

use uuid::Uuid;

use crate::source::SourceKind;

/// Derive the unified entity id for an upstream identifier.
///
/// The mapping is injective per source and deterministic: the same
/// (source, upstream id) pair always yields the same unified id, so
/// entities keep their identity across restarts and re-syncs.
#[must_use]
pub fn unified_entity_id(source: SourceKind, upstream_id: &str) -> String {
    let seed = format!("{source}/{upstream_id}");
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    format!("{source}:{uuid}")
}

#[cfg(test)]
mod tests {
    use crate::source::SourceKind;
    use crate::unified_entity_id;

    #[test]
    fn entity_id_deterministic() {
        let a = unified_entity_id(SourceKind::SmartRelay, "relay-07");
        let b = unified_entity_id(SourceKind::SmartRelay, "relay-07");
        assert_eq!(a, b);
    }

    #[test]
    fn entity_id_injective_per_source() {
        let a = unified_entity_id(SourceKind::SmartRelay, "relay-07");
        let b = unified_entity_id(SourceKind::SmartRelay, "relay-08");
        let c = unified_entity_id(SourceKind::PowerDaemon, "relay-07");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
