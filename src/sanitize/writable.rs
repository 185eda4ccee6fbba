//! Writable-field resolution and the per-entity allowlist cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::trace;

use super::system::is_system_field;
use crate::schema::{field_names, EntitySchema};

/// Fields of `schema` that callers may set: schema fields minus system fields.
///
/// Never fails. An empty or malformed schema resolves to an empty set, which
/// callers must treat as "nothing is writable".
pub fn resolve_writable(schema: &EntitySchema) -> BTreeSet<String> {
    field_names(schema)
        .into_iter()
        .filter(|name| !is_system_field(name))
        .map(str::to_owned)
        .collect()
}

/// Per-entity allowlist cache keyed by entity name.
///
/// Entries are computed on first use and then only read. Two callers racing
/// on the same cold entry both compute the (identical) set and the first
/// insert wins. Schemas are static per deployment; use
/// [`invalidate`](Self::invalidate) or [`clear`](Self::clear) when one is
/// swapped at runtime or between tests.
#[derive(Debug, Default)]
pub struct AllowlistCache {
    entries: RwLock<HashMap<String, Arc<BTreeSet<String>>>>,
}

impl AllowlistCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the writable allowlist for `schema`, computing it on a miss.
    pub fn writable(&self, schema: &EntitySchema) -> Arc<BTreeSet<String>> {
        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(schema.name()) {
                return Arc::clone(hit);
            }
        }

        let computed = Arc::new(resolve_writable(schema));
        trace!(
            entity = schema.name(),
            writable = computed.len(),
            "allowlist computed"
        );

        // A poisoned lock only loses the memoisation; the computed set is
        // still correct.
        match self.entries.write() {
            Ok(mut entries) => Arc::clone(
                entries
                    .entry(schema.name().to_owned())
                    .or_insert(computed),
            ),
            Err(_) => computed,
        }
    }

    /// Drop the cached entry for one entity.
    pub fn invalidate(&self, entity: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(entity);
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
