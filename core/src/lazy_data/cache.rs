use std::{collections::HashMap, sync::Arc};

use get_size::GetSize;
use parking_lot::Mutex;
use tracing::debug;

use super::{cached::Cached, field::Field};
use crate::error::Result;

/// Materialized variables of one output.
///
/// [`VariableCache::get`] hands out the same `Arc` for a name until it is evicted, so
/// in-place changes through one handle are seen through every other.
#[derive(Debug, Default)]
pub struct VariableCache {
    entries: Mutex<HashMap<String, Cached<Arc<Field>>>>,
}

impl VariableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached field for `name`, loading it with `load` on a miss.
    pub fn get(&self, name: &str, load: impl FnOnce() -> Result<Field>) -> Result<Arc<Field>> {
        // Only the entry lookup holds the map lock, loading holds the entry's own lock.
        let entry = self.entries.lock().entry(name.to_string()).or_default().clone();
        entry.get_cached(|| {
            debug!(var = name, "Materializing variable");
            load().map(Arc::new)
        })
    }

    /// Whether `name` is materialized, without loading it.
    pub fn has(&self, name: &str) -> bool {
        self.entries
            .lock()
            .get(name)
            .map_or(false, Cached::is_cached)
    }

    /// Names of the materialized variables.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, c)| c.is_cached())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Drops one variable, returning whether it was materialized.
    pub fn forget(&self, name: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .remove(name)
            .map_or(false, |c| c.invalidate());
        if removed {
            debug!(var = name, "Evicted variable");
        }
        removed
    }

    /// Drops all variables. Their mappings are released once no handle is left.
    pub fn evict(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        let count = entries.values().filter(|c| c.invalidate()).count();
        if count > 0 {
            debug!(count, "Evicted variables");
        }
    }
}

impl GetSize for VariableCache {
    fn get_heap_size(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .map(|(name, c)| {
                name.get_heap_size() + c.peek().map_or(0, |f| f.get_heap_size())
            })
            .sum()
    }
}
