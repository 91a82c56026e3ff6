//! Smallest-first handle allocation over a set of free ranges.

use tracing::warn;

use crate::error::HandleError;
use crate::handle::HandleValue;
use crate::HandleResult;

/// An inclusive range of currently unused handle values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange<H> {
    pub min: H,
    pub max: H,
}

impl<H: HandleValue> FreeRange<H> {
    fn len(&self) -> u64 {
        self.max.to_u64() - self.min.to_u64() + 1
    }
}

/// Where a handle value stands in an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Allocated and not yet released.
    Used,

    /// Within the addressable space but not allocated.
    Free,

    /// Above the allocator's ceiling.
    OutOfRange,
}

/// Hands out the smallest free handle in `0..=ceiling` and takes handles back
/// for reuse.
///
/// Free space is kept as a sorted list of disjoint, maximally coalesced
/// ranges. Not synchronized; wrap it in a lock when shared.
#[derive(Debug, Clone)]
pub struct IndexAllocator<H> {
    free: Vec<FreeRange<H>>,
    ceiling: H,
}

impl<H: HandleValue> IndexAllocator<H> {
    /// Create an allocator spanning every value below the sentinel.
    pub fn new() -> Self {
        Self::with_ceiling(H::SENTINEL)
    }

    /// Create an allocator spanning `0..=ceiling`.
    ///
    /// The ceiling is clamped below the sentinel.
    pub fn with_ceiling(ceiling: H) -> Self {
        let max_ceiling = H::SENTINEL.prev().unwrap_or(H::ZERO);
        let ceiling = ceiling.min(max_ceiling);

        let mut free = Vec::with_capacity(64);
        free.push(FreeRange {
            min: H::ZERO,
            max: ceiling,
        });

        Self { free, ceiling }
    }

    /// Highest handle this allocator can return.
    pub fn ceiling(&self) -> H {
        self.ceiling
    }

    /// Allocate the smallest free handle.
    pub fn allocate(&mut self) -> HandleResult<H> {
        let first = self.free.first_mut().ok_or(HandleError::Exhausted)?;
        let handle = first.min;

        match handle.next() {
            Some(next) if handle < first.max => first.min = next,
            _ => {
                self.free.remove(0);
            }
        }

        Ok(handle)
    }

    /// Return `handle` to the pool.
    ///
    /// Releasing a handle that is free or out of range leaves the allocator
    /// untouched and reports [`HandleError::NotAllocated`].
    pub fn release(&mut self, handle: H) -> HandleResult<()> {
        if handle > self.ceiling {
            warn!(%handle, "Release of out-of-range handle ignored");
            return Err(HandleError::NotAllocated(handle.to_u64()));
        }

        let idx = self.free.partition_point(|r| r.max < handle);
        if idx < self.free.len() && self.free[idx].min <= handle {
            warn!(%handle, "Double release ignored");
            return Err(HandleError::NotAllocated(handle.to_u64()));
        }

        let joins_prev = idx > 0 && self.free[idx - 1].max.next() == Some(handle);
        let joins_next = idx < self.free.len() && handle.next() == Some(self.free[idx].min);

        match (joins_prev, joins_next) {
            (true, true) => {
                self.free[idx - 1].max = self.free[idx].max;
                self.free.remove(idx);
            }
            (true, false) => self.free[idx - 1].max = handle,
            (false, true) => self.free[idx].min = handle,
            (false, false) => self.free.insert(
                idx,
                FreeRange {
                    min: handle,
                    max: handle,
                },
            ),
        }

        Ok(())
    }

    /// Classify `handle` without changing anything.
    pub fn state(&self, handle: H) -> HandleState {
        if handle > self.ceiling {
            return HandleState::OutOfRange;
        }

        let idx = self.free.partition_point(|r| r.max < handle);
        if idx < self.free.len() && self.free[idx].min <= handle {
            HandleState::Free
        } else {
            HandleState::Used
        }
    }

    /// Returns true if `handle` is currently allocated.
    pub fn is_used(&self, handle: H) -> bool {
        self.state(handle) == HandleState::Used
    }

    /// Count used (`true`) or free (`false`) handles.
    pub fn count(&self, used: bool) -> u64 {
        let free: u64 = self.free.iter().map(FreeRange::len).sum();
        if used {
            self.ceiling.to_u64() + 1 - free
        } else {
            free
        }
    }

    /// Current free ranges, ascending.
    pub fn free_ranges(&self) -> &[FreeRange<H>] {
        &self.free
    }
}

impl<H: HandleValue> Default for IndexAllocator<H> {
    fn default() -> Self {
        Self::new()
    }
}
