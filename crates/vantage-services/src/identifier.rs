//! Identifier map — compacts value descriptors to 4-byte handles.
//!
//! A descriptor is bound to exactly one handle for the lifetime of the map.
//! Binding is check-and-set under the forward map's shard lock, so two
//! concurrent first callers observe the same handle.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use vantage_core::wire::IdentifierError;
use vantage_core::{ValueDescriptor, ValueHandle};

/// Descriptor ↔ handle mapping shared by a cycle's caches and codecs.
pub trait IdentifierMap: Send + Sync {
    /// Handle for `descriptor`, minting one on first use.
    fn get_or_assign(&self, descriptor: &ValueDescriptor) -> ValueHandle;

    /// Handle for `descriptor` if one was ever assigned.
    fn lookup(&self, descriptor: &ValueDescriptor) -> Option<ValueHandle>;

    fn resolve(&self, handle: ValueHandle) -> Result<ValueDescriptor, IdentifierError>;

    /// Bind a handle chosen elsewhere (mirroring a peer's registrations).
    fn register(&self, handle: ValueHandle, descriptor: ValueDescriptor) -> Result<(), IdentifierError>;

    fn get_or_assign_all(&self, descriptors: &[ValueDescriptor]) -> Vec<ValueHandle> {
        descriptors.iter().map(|d| self.get_or_assign(d)).collect()
    }

    fn resolve_all(&self, handles: &[ValueHandle]) -> Result<Vec<ValueDescriptor>, IdentifierError> {
        handles.iter().map(|h| self.resolve(*h)).collect()
    }
}

/// In-memory identifier map.
#[derive(Default)]
pub struct InMemoryIdentifierMap {
    forward: DashMap<ValueDescriptor, ValueHandle>,
    reverse: DashMap<ValueHandle, ValueDescriptor>,
    next: AtomicU64,
}

impl InMemoryIdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    fn mint(&self) -> ValueHandle {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        // Running out of 32-bit handles breaks the one-handle-per-descriptor invariant.
        let n = u32::try_from(n).expect("identifier map handle space exhausted");
        ValueHandle(n)
    }
}

impl IdentifierMap for InMemoryIdentifierMap {
    fn get_or_assign(&self, descriptor: &ValueDescriptor) -> ValueHandle {
        if let Some(h) = self.forward.get(descriptor) {
            return *h;
        }
        *self
            .forward
            .entry(descriptor.clone())
            .or_insert_with(|| {
                let handle = self.mint();
                // Reverse binding is visible before the forward one is published.
                self.reverse.insert(handle, descriptor.clone());
                tracing::trace!(%handle, %descriptor, "identifier assigned");
                handle
            })
    }

    fn lookup(&self, descriptor: &ValueDescriptor) -> Option<ValueHandle> {
        self.forward.get(descriptor).map(|h| *h)
    }

    fn resolve(&self, handle: ValueHandle) -> Result<ValueDescriptor, IdentifierError> {
        self.reverse
            .get(&handle)
            .map(|d| d.clone())
            .ok_or(IdentifierError::UnknownHandle(handle))
    }

    fn register(&self, handle: ValueHandle, descriptor: ValueDescriptor) -> Result<(), IdentifierError> {
        if let Some(existing) = self.reverse.get(&handle) {
            if *existing != descriptor {
                return Err(IdentifierError::Conflict {
                    handle,
                    existing: existing.clone(),
                });
            }
            return Ok(());
        }
        if let Some(bound) = self.forward.get(&descriptor) {
            if *bound != handle {
                return Err(IdentifierError::Conflict {
                    handle: *bound,
                    existing: descriptor.clone(),
                });
            }
        }
        self.reverse.insert(handle, descriptor.clone());
        self.forward.insert(descriptor, handle);
        // Keep locally minted handles clear of mirrored ones.
        self.next.fetch_max(u64::from(handle.0) + 1, Ordering::Relaxed);
        Ok(())
    }
}
