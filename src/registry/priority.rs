use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use itertools::Itertools;

use unified::source::SourceKind;

use crate::error::{HubError, HubResult};

/// Totally orders source kinds. Lower number means higher priority; a
/// source missing from the table gets [`Self::SENTINEL`] (lowest).
#[derive(Debug)]
pub struct SourcePriorityManager {
    priorities: RwLock<HashMap<SourceKind, i64>>,
}

impl Default for SourcePriorityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePriorityManager {
    pub const SENTINEL: i64 = 1000;

    const DEFAULTS: [(SourceKind, i64); 6] = [
        (SourceKind::HomeAutomation, 1),
        (SourceKind::CameraCloud, 2),
        (SourceKind::SmartRelay, 3),
        (SourceKind::PowerDaemon, 4),
        (SourceKind::NetworkInventory, 5),
        (SourceKind::Virtual, 10),
    ];

    #[must_use]
    pub fn new() -> Self {
        Self {
            priorities: RwLock::new(Self::DEFAULTS.into_iter().collect()),
        }
    }

    #[must_use]
    pub fn get(&self, source: SourceKind) -> i64 {
        self.priorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source)
            .copied()
            .unwrap_or(Self::SENTINEL)
    }

    pub fn set(&self, source: SourceKind, priority: i64) -> HubResult<()> {
        if priority < 0 {
            return Err(HubError::InvalidPriority(priority));
        }
        self.priorities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source, priority);
        Ok(())
    }

    /// Atomic bulk update: all entries are validated before any is applied.
    pub fn set_many(&self, updates: &HashMap<SourceKind, i64>) -> HubResult<()> {
        if let Some(bad) = updates.values().find(|p| **p < 0) {
            return Err(HubError::InvalidPriority(*bad));
        }
        let mut map = self
            .priorities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for (source, priority) in updates {
            map.insert(*source, *priority);
        }
        Ok(())
    }

    pub fn reset_to_defaults(&self) {
        *self
            .priorities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Self::DEFAULTS.into_iter().collect();
    }

    /// All known sources, sorted ascending by priority (best first).
    #[must_use]
    pub fn order(&self) -> Vec<SourceKind> {
        self.priorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .sorted_by_key(|(source, priority)| (**priority, **source))
            .map(|(source, _)| *source)
            .collect()
    }

    /// Should an entity from `new` replace one held from `current`?
    #[must_use]
    pub fn should_override(&self, current: SourceKind, new: SourceKind) -> bool {
        self.get(new) < self.get(current)
    }

    #[must_use]
    pub fn highest_of(&self, sources: &[SourceKind]) -> Option<SourceKind> {
        sources.iter().copied().min_by_key(|s| self.get(*s))
    }

    #[must_use]
    pub fn compare(&self, a: SourceKind, b: SourceKind) -> Ordering {
        self.get(a).cmp(&self.get(b))
    }
}
