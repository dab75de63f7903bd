//! # Segment Arena
//!
//! Fixed-block free-list allocator for the short-lived linked records that
//! every other component churns through (store-builder segments, traceback
//! entries, live edge segments, mutation list nodes).
//!
//! Records live in one contiguous `Vec` and are addressed by opaque
//! [`Handle`]s. Freed slots are threaded onto a free list and reused before
//! the arena grows; growth happens one block at a time. Nothing is ever
//! compacted, and [`SegmentArena::clear`] releases every record at once.
//!
//! [`IndexList`] builds an intrusive singly linked list on top of the arena:
//! each record stores the handle of its successor, giving O(1) append
//! without any reference aliasing.

use std::fmt;

use crate::error::{InferError, Result};

/// Opaque index of a record inside a [`SegmentArena`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
enum Slot<T> {
    Occupied(T),
    Free { next: Option<Handle> },
}

/// Free-list arena growing in fixed-size blocks
#[derive(Clone, Debug)]
pub struct SegmentArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<Handle>,
    num_free: usize,
    block_size: usize,
}

impl<T> SegmentArena<T> {
    /// Create an empty arena. `block_size` is the number of records added
    /// each time the arena runs out of slots.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(InferError::invalid_parameter(
                "arena block size must be positive",
            ));
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(block_size)?;
        Ok(Self {
            slots,
            free_head: None,
            num_free: 0,
            block_size,
        })
    }

    /// Store `value` and return its handle.
    ///
    /// Reuses a freed slot when one is available. If growing the backing
    /// storage fails the arena is left exactly as it was.
    pub fn allocate(&mut self, value: T) -> Result<Handle> {
        if let Some(handle) = self.free_head {
            let next = match &self.slots[handle.index()] {
                Slot::Free { next } => *next,
                Slot::Occupied(_) => {
                    return Err(InferError::internal(format!(
                        "arena free list points at live slot {}",
                        handle
                    )))
                }
            };
            self.slots[handle.index()] = Slot::Occupied(value);
            self.free_head = next;
            self.num_free -= 1;
            return Ok(handle);
        }

        if self.slots.len() >= u32::MAX as usize {
            return Err(InferError::allocation("arena handle space exhausted"));
        }
        if self.slots.len() == self.slots.capacity() {
            self.slots.try_reserve_exact(self.block_size)?;
        }
        let handle = Handle(self.slots.len() as u32);
        self.slots.push(Slot::Occupied(value));
        Ok(handle)
    }

    /// Make sure the next `additional` allocations cannot fail.
    ///
    /// Grows by whole blocks. On failure nothing is changed.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = additional.saturating_sub(self.num_free);
        let spare = self.slots.capacity() - self.slots.len();
        if needed > spare {
            if self.slots.len() + needed > u32::MAX as usize {
                return Err(InferError::allocation("arena handle space exhausted"));
            }
            let blocks = (needed - spare).div_ceil(self.block_size);
            self.slots
                .try_reserve_exact(spare + blocks * self.block_size)?;
        }
        Ok(())
    }

    /// Release a record, returning its value. O(1).
    pub fn free(&mut self, handle: Handle) -> Result<T> {
        let limit = self.slots.len();
        let slot = self
            .slots
            .get_mut(handle.index())
            .ok_or_else(|| InferError::out_of_range("arena handle", handle.index(), limit))?;
        if matches!(slot, Slot::Free { .. }) {
            return Err(InferError::internal(format!(
                "arena slot {} freed twice",
                handle
            )));
        }
        let old = std::mem::replace(
            slot,
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(handle);
        self.num_free += 1;
        match old {
            Slot::Occupied(value) => Ok(value),
            Slot::Free { .. } => Err(InferError::internal("arena slot state changed")),
        }
    }

    /// Release every record at once, keeping the allocated capacity
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.num_free = 0;
    }

    /// Borrow a live record
    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow a live record
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Borrow a live record; a freed or unknown handle is a broken invariant
    #[inline]
    pub fn try_get(&self, handle: Handle) -> Result<&T> {
        self.get(handle).ok_or_else(|| stale_handle(handle))
    }

    /// Mutably borrow a live record; see [`SegmentArena::try_get`]
    #[inline]
    pub fn try_get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        self.get_mut(handle).ok_or_else(|| stale_handle(handle))
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.slots.len() - self.num_free
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of freed slots awaiting reuse
    pub fn num_free(&self) -> usize {
        self.num_free
    }

    /// Number of record slots currently reserved
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks reserved so far
    pub fn num_blocks(&self) -> usize {
        self.capacity().div_ceil(self.block_size)
    }

    /// Approximate memory held by the arena in bytes
    pub fn size_bytes(&self) -> usize {
        self.capacity() * std::mem::size_of::<Slot<T>>() + std::mem::size_of::<Self>()
    }
}

fn stale_handle(handle: Handle) -> InferError {
    InferError::internal(format!("arena handle {} is not live", handle))
}

/// A record that can be threaded onto an [`IndexList`]
pub trait Linked {
    fn next(&self) -> Option<Handle>;
    fn set_next(&mut self, next: Option<Handle>);
}

/// Head/tail pair of an intrusive list whose records live in a shared arena
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexList {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

impl IndexList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn head(&self) -> Option<Handle> {
        self.head
    }

    pub fn tail(&self) -> Option<Handle> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append a record to the end of the list
    pub fn push_back<T: Linked>(&mut self, arena: &mut SegmentArena<T>, mut value: T) -> Result<Handle> {
        value.set_next(None);
        // Check the tail before allocating so a failure leaves the arena untouched
        if let Some(tail) = self.tail {
            arena.try_get(tail)?;
        }
        let handle = arena.allocate(value)?;
        match self.tail {
            Some(tail) => arena.try_get_mut(tail)?.set_next(Some(handle)),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        self.len += 1;
        Ok(handle)
    }

    /// Iterate over the records in list order
    pub fn iter<'a, T: Linked>(&self, arena: &'a SegmentArena<T>) -> IndexListIter<'a, T> {
        IndexListIter {
            arena,
            cursor: self.head,
        }
    }

    /// Free every record of this list back to the arena
    pub fn free_all<T: Linked>(&mut self, arena: &mut SegmentArena<T>) -> Result<()> {
        let mut cursor = self.head.take();
        while let Some(handle) = cursor {
            let record = arena.free(handle)?;
            cursor = record.next();
        }
        self.tail = None;
        self.len = 0;
        Ok(())
    }

    /// Forget the list without touching the arena (used after `arena.clear()`)
    pub fn forget(&mut self) {
        *self = Self::new();
    }

    /// Move out all records satisfying `pred`, relinking the rest in place.
    pub fn drain_where<T, F>(&mut self, arena: &mut SegmentArena<T>, mut pred: F) -> Result<Vec<T>>
    where
        T: Linked,
        F: FnMut(&T) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = IndexList::new();
        let mut cursor = self.head.take();
        while let Some(handle) = cursor {
            let record = arena.try_get_mut(handle)?;
            cursor = record.next();
            if pred(&*record) {
                taken.push(arena.free(handle)?);
            } else {
                record.set_next(None);
                match kept.tail {
                    Some(tail) => arena.try_get_mut(tail)?.set_next(Some(handle)),
                    None => kept.head = Some(handle),
                }
                kept.tail = Some(handle);
                kept.len += 1;
            }
        }
        *self = kept;
        Ok(taken)
    }
}

/// Iterator over an [`IndexList`]
pub struct IndexListIter<'a, T> {
    arena: &'a SegmentArena<T>,
    cursor: Option<Handle>,
}

impl<'a, T: Linked> Iterator for IndexListIter<'a, T> {
    type Item = (Handle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let record = self.arena.get(handle)?;
        self.cursor = record.next();
        Some((handle, record))
    }
}
