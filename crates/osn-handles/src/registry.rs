//! Handle-to-object binding with tag-checked lookup.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::HandleError;
use crate::handle::HandleValue;
use crate::index::IndexAllocator;
use crate::HandleResult;

/// An object that carries a runtime kind tag.
pub trait Tagged {
    type Tag: Copy + Eq + Debug + Display;

    fn tag(&self) -> Self::Tag;
}

/// Identity comparison used for reverse lookup.
pub trait Identity {
    fn same_object(&self, other: &Self) -> bool;
}

struct Table<H, O> {
    index: IndexAllocator<H>,
    objects: BTreeMap<H, O>,
}

/// Maps allocated handles to tagged objects.
///
/// The allocator and the table sit behind one lock, so every operation is
/// atomic with respect to every other. The registry never destroys what an
/// entry refers to; removing an entry only hands it back to the caller.
pub struct ObjectRegistry<H, O> {
    table: Mutex<Table<H, O>>,
}

impl<H: HandleValue, O: Tagged> ObjectRegistry<H, O> {
    pub fn new() -> Self {
        Self::with_ceiling(H::SENTINEL)
    }

    /// Create a registry whose handles never exceed `ceiling`.
    pub fn with_ceiling(ceiling: H) -> Self {
        Self {
            table: Mutex::new(Table {
                index: IndexAllocator::with_ceiling(ceiling),
                objects: BTreeMap::new(),
            }),
        }
    }

    /// Store `object` under a newly allocated handle.
    pub fn map(&self, object: O) -> HandleResult<H> {
        let mut table = self.table.lock();
        let handle = table.index.allocate()?;
        trace!(%handle, kind = %object.tag(), "Mapped object");
        table.objects.insert(handle, object);
        Ok(handle)
    }

    /// Remove the entry for `handle` and return it.
    pub fn unmap(&self, handle: H) -> HandleResult<O> {
        let mut table = self.table.lock();
        let object = table
            .objects
            .remove(&handle)
            .ok_or(HandleError::InvalidReference(handle.to_u64()))?;
        table.index.release(handle)?;
        trace!(%handle, kind = %object.tag(), "Unmapped object");
        Ok(object)
    }

    /// Remove the entry for `handle` only if it is of kind `expected` and
    /// satisfies `pred`, under a single lock.
    ///
    /// A missing entry, or one `pred` rejects, is reported as an invalid
    /// reference and left in place. A kind mismatch is reported as
    /// [`HandleError::TypeMismatch`].
    pub fn take_if<P>(&self, handle: H, expected: O::Tag, pred: P) -> HandleResult<O>
    where
        P: FnOnce(&O) -> bool,
    {
        let mut table = self.table.lock();
        let object = table
            .objects
            .get(&handle)
            .ok_or(HandleError::InvalidReference(handle.to_u64()))?;

        let found = object.tag();
        if found != expected {
            return Err(HandleError::TypeMismatch {
                handle: handle.to_u64(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        if !pred(object) {
            return Err(HandleError::InvalidReference(handle.to_u64()));
        }

        table.index.release(handle)?;
        let object = table
            .objects
            .remove(&handle)
            .ok_or(HandleError::InvalidReference(handle.to_u64()))?;
        trace!(%handle, kind = %found, "Took object");
        Ok(object)
    }

    /// Return a copy of the entry for `handle`.
    pub fn lookup(&self, handle: H) -> HandleResult<O>
    where
        O: Clone,
    {
        self.table
            .lock()
            .objects
            .get(&handle)
            .cloned()
            .ok_or(HandleError::InvalidReference(handle.to_u64()))
    }

    /// Resolve `handle` as an object of kind `expected`.
    ///
    /// A kind mismatch is reported as [`HandleError::TypeMismatch`]. If
    /// `extract` yields nothing (the referenced object is gone) the handle
    /// is reported as an invalid reference.
    pub fn fetch<T, F>(&self, handle: H, expected: O::Tag, extract: F) -> HandleResult<T>
    where
        F: FnOnce(&O) -> Option<T>,
    {
        let table = self.table.lock();
        let object = table
            .objects
            .get(&handle)
            .ok_or(HandleError::InvalidReference(handle.to_u64()))?;

        let found = object.tag();
        if found != expected {
            return Err(HandleError::TypeMismatch {
                handle: handle.to_u64(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        extract(object).ok_or(HandleError::InvalidReference(handle.to_u64()))
    }

    /// Kind of the entry stored under `handle`, if any.
    pub fn tag_of(&self, handle: H) -> Option<O::Tag> {
        self.table.lock().objects.get(&handle).map(Tagged::tag)
    }

    /// Reverse lookup: the handle `target` is stored under.
    pub fn find(&self, target: &O) -> Option<H>
    where
        O: Identity,
    {
        self.find_by(|object| object.same_object(target))
    }

    /// First handle whose entry satisfies `pred`.
    pub fn find_by<P>(&self, mut pred: P) -> Option<H>
    where
        P: FnMut(&O) -> bool,
    {
        self.table
            .lock()
            .objects
            .iter()
            .find(|(_, object)| pred(object))
            .map(|(handle, _)| *handle)
    }

    /// Visit every entry in ascending handle order.
    ///
    /// The registry lock is held for the whole walk; `f` must not call back
    /// into this registry.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(H, &O),
    {
        let table = self.table.lock();
        for (handle, object) in &table.objects {
            f(*handle, object);
        }
    }

    /// Remove every entry and return them in ascending handle order.
    pub fn clear(&self) -> Vec<(H, O)> {
        let mut table = self.table.lock();
        let objects = std::mem::take(&mut table.objects);
        for handle in objects.keys() {
            // Every mapped handle was allocated, so release cannot fail
            // unless the table and the allocator disagree.
            if let Err(err) = table.index.release(*handle) {
                warn!(%handle, "Allocator out of sync while clearing: {err}");
            }
        }
        objects.into_iter().collect()
    }

    /// All live handles, ascending.
    pub fn handles(&self) -> Vec<H> {
        self.table.lock().objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().objects.is_empty()
    }

    /// Count used (`true`) or free (`false`) handles.
    pub fn count(&self, used: bool) -> u64 {
        self.table.lock().index.count(used)
    }

    /// Returns true if `handle` is currently mapped.
    pub fn contains(&self, handle: H) -> bool {
        self.table.lock().objects.contains_key(&handle)
    }
}

impl<H: HandleValue, O: Tagged> Default for ObjectRegistry<H, O> {
    fn default() -> Self {
        Self::new()
    }
}
