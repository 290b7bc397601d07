// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Handle table: allocation, lookup, and reclamation of socket records.
//!
//! The table is the only process-wide shared state in Mage. The global lock over the slot vector
//! is taken only briefly (writably for [`HandleTable::allocate`] and [`HandleTable::release`],
//! readably for [`HandleTable::lookup`]); all per-socket work happens under the per-entry lock of
//! the record that was looked up, so that operations on different handles never block each other.
//!
//! Lock order is per-entry lock first, then the global lock, never the other way around.

use alloc::sync::Arc;
use alloc::vec::Vec;

use thiserror::Error;


/// Maximum number of simultaneously live handles in a single table.
pub const MAX_HANDLES: usize = 1024;

/// An opaque identifier for one record in a [`HandleTable`].
///
/// Identifiers are unique among live records; a released identifier may be handed out again by a
/// later [`HandleTable::allocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    /// Reconstruct a handle from its raw value. Whether it names anything is only known once it is
    /// looked up.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw value of this handle
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Entries stored in a [`HandleTable`].
pub trait TableEntry {
    /// Called (under the entry's lock) when the entry is released. The entry must let go of any
    /// external resources and hand back the handles that it owns, which are then released too.
    fn reclaim(&mut self) -> Vec<Handle>;
}

/// Possible errors from a [`HandleTable`]
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("Not a valid open handle")]
    NotFound,
    #[error("Too many open handles")]
    TableFull,
}

type Slot<E> = Option<Arc<spin::Mutex<E>>>;

/// A table of live records, indexed by [`Handle`].
pub struct HandleTable<E> {
    entries: spin::RwLock<Vec<Slot<E>>>,
}

impl<E: TableEntry> Default for HandleTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TableEntry> HandleTable<E> {
    /// An empty table
    pub const fn new() -> Self {
        Self {
            entries: spin::RwLock::new(Vec::new()),
        }
    }

    /// Insert `entry`, producing a handle not currently in use. The lowest free slot is reused
    /// first.
    pub fn allocate(&self, entry: E) -> Result<Handle, HandleError> {
        let mut entries = self.entries.write();
        let slot = Some(Arc::new(spin::Mutex::new(entry)));
        if let Some(idx) = entries.iter().position(Option::is_none) {
            entries[idx] = slot;
            Ok(Handle(idx))
        } else if entries.len() < MAX_HANDLES {
            entries.push(slot);
            Ok(Handle(entries.len() - 1))
        } else {
            Err(HandleError::TableFull)
        }
    }

    /// Get the record for `handle`.
    ///
    /// The returned record stays valid even if the handle is released concurrently; callers that
    /// hold on to it across a wait must re-check whether it was reclaimed.
    pub fn lookup(&self, handle: Handle) -> Result<Arc<spin::Mutex<E>>, HandleError> {
        self.entries
            .read()
            .get(handle.0)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(HandleError::NotFound)
    }

    /// Remove the record for `handle`, cascading to every handle it owns. Returns the removed
    /// record.
    pub fn release(&self, handle: Handle) -> Result<Arc<spin::Mutex<E>>, HandleError> {
        self.release_if(handle, |_| true)
    }

    /// Like [`Self::release`], but only if `handle` still names `record` (as obtained from an
    /// earlier [`Self::lookup`]), rather than a record that has since taken over its slot.
    pub fn release_record(
        &self,
        handle: Handle,
        record: &Arc<spin::Mutex<E>>,
    ) -> Result<Arc<spin::Mutex<E>>, HandleError> {
        self.release_if(handle, |slot| Arc::ptr_eq(slot, record))
    }

    fn release_if(
        &self,
        handle: Handle,
        matches: impl FnOnce(&Arc<spin::Mutex<E>>) -> bool,
    ) -> Result<Arc<spin::Mutex<E>>, HandleError> {
        let entry = self
            .entries
            .write()
            .get_mut(handle.0)
            .and_then(|slot| slot.take_if(|entry| matches(&*entry)))
            .ok_or(HandleError::NotFound)?;
        let owned = entry.lock().reclaim();
        for child in owned {
            // Owners keep their handles out of reach of everyone else, so these are still live.
            let _ = self.release(child);
        }
        Ok(entry)
    }

    /// A snapshot of all live records at this instant.
    pub fn snapshot(&self) -> Vec<(Handle, Arc<spin::Mutex<E>>)> {
        self.entries
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (Handle(i), e.clone())))
            .collect()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.entries.read().iter().filter(|e| e.is_some()).count()
    }

    /// Whether the table has no live records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
