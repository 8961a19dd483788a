//! View computation cache — per-cycle store of computed values.
//!
//! Two partitions:
//!   shared  — visible to every job of the cycle
//!   private — visible only to the job that wrote it, dropped when it ends
//!
//! Values are keyed by `ValueHandle`, so every descriptor that reaches the
//! cache is compacted through the cycle source's identifier map first.
//! Writes are last-writer-wins; a cycle has a single producer per descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use vantage_core::{CacheSelectHint, ComputedValue, JobSpecification, Value, ValueDescriptor, ValueHandle};

use crate::identifier::{IdentifierMap, InMemoryIdentifierMap};

/// Which partition a read or write goes to.
#[derive(Debug, Clone, Copy)]
pub enum CachePartition<'a> {
    Shared,
    Private(&'a JobSpecification),
}

impl<'a> CachePartition<'a> {
    /// Partition for `descriptor` as selected by a job's hint.
    pub fn select(hint: &CacheSelectHint, spec: &'a JobSpecification, descriptor: &ValueDescriptor) -> Self {
        if hint.is_private(descriptor) {
            CachePartition::Private(spec)
        } else {
            CachePartition::Shared
        }
    }
}

/// Cache for one view cycle.
pub struct ViewComputationCache {
    cycle_id: u64,
    identifiers: Arc<dyn IdentifierMap>,
    shared: DashMap<ValueHandle, Arc<Value>>,
    private: DashMap<JobSpecification, HashMap<ValueHandle, Arc<Value>>>,
}

impl ViewComputationCache {
    pub fn new(cycle_id: u64, identifiers: Arc<dyn IdentifierMap>) -> Self {
        Self {
            cycle_id,
            identifiers,
            shared: DashMap::new(),
            private: DashMap::new(),
        }
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn identifiers(&self) -> &Arc<dyn IdentifierMap> {
        &self.identifiers
    }

    pub fn get(&self, descriptor: &ValueDescriptor, partition: CachePartition<'_>) -> Option<Arc<Value>> {
        let handle = self.identifiers.lookup(descriptor)?;
        match partition {
            CachePartition::Shared => self.shared.get(&handle).map(|v| v.clone()),
            CachePartition::Private(spec) => self
                .private
                .get(spec)
                .and_then(|values| values.get(&handle).cloned()),
        }
    }

    pub fn put(&self, descriptor: &ValueDescriptor, value: Value, partition: CachePartition<'_>) {
        let handle = self.identifiers.get_or_assign(descriptor);
        let value = Arc::new(value);
        match partition {
            CachePartition::Shared => {
                self.shared.insert(handle, value);
            }
            CachePartition::Private(spec) => {
                self.private.entry(spec.clone()).or_default().insert(handle, value);
            }
        }
    }

    /// Read every descriptor from the partition `hint` selects for it.
    /// Output lines up with `descriptors`.
    pub fn get_values(
        &self,
        descriptors: &[ValueDescriptor],
        spec: &JobSpecification,
        hint: &CacheSelectHint,
    ) -> Vec<Option<Arc<Value>>> {
        descriptors
            .iter()
            .map(|d| self.get(d, CachePartition::select(hint, spec, d)))
            .collect()
    }

    /// Write every value to the partition `hint` selects for it.
    pub fn put_values(&self, values: Vec<ComputedValue>, spec: &JobSpecification, hint: &CacheSelectHint) {
        for cv in values {
            let partition = CachePartition::select(hint, spec, &cv.descriptor);
            self.put(&cv.descriptor, cv.value, partition);
        }
    }

    /// Drop a job's private partition. Returns the number of values dropped.
    pub fn release_private(&self, spec: &JobSpecification) -> usize {
        self.private.remove(spec).map(|(_, values)| values.len()).unwrap_or(0)
    }

    pub fn shared_len(&self) -> usize {
        self.shared.len()
    }

    pub fn private_len(&self, spec: &JobSpecification) -> usize {
        self.private.get(spec).map(|values| values.len()).unwrap_or(0)
    }
}

/// Hands out one cache per cycle. Explicitly constructed and passed to
/// every node; there is no process-wide cache.
pub struct ViewComputationCacheSource {
    identifiers: Arc<dyn IdentifierMap>,
    caches: DashMap<u64, Arc<ViewComputationCache>>,
}

impl Default for ViewComputationCacheSource {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryIdentifierMap::new()))
    }
}

impl ViewComputationCacheSource {
    pub fn new(identifiers: Arc<dyn IdentifierMap>) -> Self {
        Self {
            identifiers,
            caches: DashMap::new(),
        }
    }

    pub fn identifiers(&self) -> &Arc<dyn IdentifierMap> {
        &self.identifiers
    }

    /// Cache for `cycle_id`, created on first use.
    pub fn cache(&self, cycle_id: u64) -> Arc<ViewComputationCache> {
        self.caches
            .entry(cycle_id)
            .or_insert_with(|| {
                tracing::debug!(cycle_id, "view computation cache created");
                Arc::new(ViewComputationCache::new(cycle_id, self.identifiers.clone()))
            })
            .clone()
    }

    /// Tear down the cycle's cache. Nodes still holding it keep a
    /// detached copy until they drop it.
    pub fn release_cycle(&self, cycle_id: u64) -> bool {
        let released = self.caches.remove(&cycle_id);
        if let Some((_, cache)) = &released {
            tracing::debug!(cycle_id, shared = cache.shared_len(), "view computation cache released");
        }
        released.is_some()
    }

    pub fn active_cycles(&self) -> Vec<u64> {
        let mut cycles: Vec<u64> = self.caches.iter().map(|e| *e.key()).collect();
        cycles.sort_unstable();
        cycles
    }
}
