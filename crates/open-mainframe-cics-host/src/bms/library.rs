//! Process-wide map library.
//!
//! One [`MapDefinition`] instance exists per compiled map and is shared by
//! every session behind its own mutex. Bytes appended to a map by the error
//! overlay are tracked separately, keyed by qualified map name, so a caller
//! holding the compiled record length is still accepted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::debug;

use super::MapDefinition;
use crate::{CicsError, CicsResult};

/// Shared handle to one map.
pub type SharedMap = Arc<Mutex<MapDefinition>>;

/// Lock a shared map, recovering the data if a previous holder panicked.
pub fn lock_map(map: &SharedMap) -> MutexGuard<'_, MapDefinition> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registered maps, keyed by `MAPSET.MAP`.
#[derive(Debug, Default)]
pub struct MapLibrary {
    maps: DashMap<String, SharedMap>,
    extra_lengths: DashMap<String, usize>,
}

impl MapLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a map, replacing any map with the same qualified name.
    pub fn register(&self, map: MapDefinition) {
        let key = map.qualified_name();
        debug!(map = %key, error_map = map.is_error_map(), "Registered BMS map");
        self.extra_lengths.remove(&key);
        self.maps.insert(key, Arc::new(Mutex::new(map)));
    }

    /// Look up a map.
    pub fn get(&self, mapset: &str, map: &str) -> CicsResult<SharedMap> {
        let key = qualified(mapset, map);
        self.maps
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CicsError::MapNotFound {
                mapset: mapset.to_uppercase(),
                map: map.to_uppercase(),
            })
    }

    /// Find the mapset that holds a map by scanning registered maps.
    ///
    /// With several candidates the alphabetically first mapset wins.
    pub fn resolve_mapset(&self, map: &str) -> Option<String> {
        let suffix = format!(".{}", map.to_uppercase());
        self.maps
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_suffix(&suffix)
                    .map(|mapset| mapset.to_string())
            })
            .min()
    }

    /// Whether a map is registered as an error map.
    pub fn is_error_map(&self, mapset: &str, map: &str) -> bool {
        self.maps
            .get(&qualified(mapset, map))
            .map(|entry| lock_map(entry.value()).is_error_map())
            .unwrap_or(false)
    }

    /// Overlay bytes currently appended to a map.
    pub fn extra_length(&self, qualified_name: &str) -> usize {
        self.extra_lengths
            .get(qualified_name)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Record overlay bytes appended to a map.
    pub fn add_extra_length(&self, qualified_name: &str, bytes: usize) {
        *self
            .extra_lengths
            .entry(qualified_name.to_string())
            .or_insert(0) += bytes;
    }

    /// Forget overlay bytes of a map.
    pub fn clear_extra_length(&self, qualified_name: &str) {
        self.extra_lengths.remove(qualified_name);
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

fn qualified(mapset: &str, map: &str) -> String {
    format!("{}.{}", mapset.to_uppercase(), map.to_uppercase())
}
