//! Fixed-capacity FIFO storage for channels
use alloc::{boxed::Box, vec::Vec};

use crate::error::CapacityExceededError;

/// A ring buffer whose capacity is fixed at creation.
///
/// Items are moved in and out by value; a vacated slot holds `None`.
pub(crate) struct Ring<T> {
    slots: Box<[Option<T>]>,
    /// The index of the oldest item.
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    /// Allocate storage for `capacity` items. Fails instead of aborting when
    /// the allocation can't be made.
    pub(crate) fn try_with_capacity(capacity: usize) -> Result<Self, CapacityExceededError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| CapacityExceededError::CapacityExceeded)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn wrap(&self, i: usize) -> usize {
        if i >= self.capacity() {
            i - self.capacity()
        } else {
            i
        }
    }

    /// Append an item at the tail. Gives the item back if the buffer is full.
    pub(crate) fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = self.wrap(self.head + self.len);
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Insert an item before the current head. Gives the item back if the
    /// buffer is full.
    pub(crate) fn push_front(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.head = self.wrap(self.head + self.capacity() - 1);
        debug_assert!(self.slots[self.head].is_none());
        self.slots[self.head] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        debug_assert!(item.is_some());
        self.head = self.wrap(self.head + 1);
        self.len -= 1;
        item
    }

    pub(crate) fn front(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    pub(crate) fn clear(&mut self) {
        while self.pop_front().is_some() {}
        self.head = 0;
    }
}
