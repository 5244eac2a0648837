//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::pid::PidMode;
use crate::registry::TypeRegistry;
use crate::StoreError;

/// Default minimum (and initial) archetype capacity.
pub const MIN_ARCHETYPE_CAPACITY: usize = 512;

/// Default initial length of the entity node table.
pub const INITIAL_ENTITY_CAPACITY: usize = 128;

/// Tunables for an [`EntityStore`](crate::store::EntityStore).
///
/// Loadable from JSON; missing fields take their defaults.
///
/// ```
/// use stratum_ecs::config::StoreConfig;
///
/// let json = r#"{ "pid_mode": "random_pids", "pid_seed": 7 }"#;
/// let config = StoreConfig::from_json_str(json).unwrap();
/// assert_eq!(config.pid_seed, 7);
/// assert_eq!(config.min_archetype_capacity, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How persistent ids relate to entity ids.
    pub pid_mode: PidMode,
    /// Seed for the random PID generator.
    pub pid_seed: u64,
    /// After a slot release, an archetype whose `count <= capacity * ratio`
    /// shrinks. `0.0` shrinks only once it is empty.
    pub shrink_ratio_threshold: f64,
    /// Initial length of the node table; ids at or beyond it are out of range
    /// until the table grows.
    pub initial_entity_capacity: usize,
    /// Archetype capacity floor. Rounded up to a power of two.
    pub min_archetype_capacity: usize,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            pid_mode: PidMode::UsePidAsId,
            pid_seed: 0,
            shrink_ratio_threshold: 0.0,
            initial_entity_capacity: INITIAL_ENTITY_CAPACITY,
            min_archetype_capacity: MIN_ARCHETYPE_CAPACITY,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Deserialize {
            key: "StoreConfig".to_string(),
            details: e.to_string(),
        })
    }

    /// The effective archetype capacity floor: a power of two, at least the
    /// largest component multiple in `registry`. Capacities only ever double
    /// or halve from here, so every padded column fits its heap.
    pub(crate) fn archetype_min_capacity(&self, registry: &TypeRegistry) -> usize {
        let multiple = registry
            .components()
            .map(|info| info.padding.component_multiple)
            .max()
            .unwrap_or(1);
        self.min_archetype_capacity
            .max(multiple)
            .max(1)
            .next_power_of_two()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
