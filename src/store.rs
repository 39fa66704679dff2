//! Single-slot storage for the current [`Value`].
//!
//! The store is the only shared mutable state in the service. Writers install a
//! fully built value; readers receive an owned snapshot, so nothing outside the
//! store ever holds a reference into the slot.

use crate::error::StoreError;
use crate::model::Value;
use parking_lot::RwLock;

/// Storage for exactly one current value.
///
/// `set` is fallible so a persistent backend can report write failures; the
/// in-memory implementation never fails.
pub trait ValueStore: Send + Sync {
    /// Install `value` as the current value.
    fn set(&self, value: Value) -> Result<(), StoreError>;

    /// Snapshot of the current value, `None` if nothing was ever set.
    fn get(&self) -> Result<Option<Value>, StoreError>;
}

/// In-memory store guarded by a readers-writer lock.
///
/// Any number of readers proceed in parallel; a writer holds the lock only for
/// the slot assignment.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slot: RwLock<Option<Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueStore for InMemoryStore {
    fn set(&self, value: Value) -> Result<(), StoreError> {
        *self.slot.write() = Some(value);
        Ok(())
    }

    fn get(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.slot.read().clone())
    }
}
