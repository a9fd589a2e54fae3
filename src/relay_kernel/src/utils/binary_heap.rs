//! Min-heap over `Vec` with a contextful comparator and position tracking
//!
//! Both the wait queues and the timer service's active list need to remove
//! arbitrary elements in `O(log n)`. They do so by recording each element's
//! index through [`BinaryHeapCtx::on_move`] and passing it to
//! [`BinaryHeap::heap_remove`].
use alloc::vec::Vec;


/// Context type for [`BinaryHeap`]'s operations.
pub(crate) trait BinaryHeapCtx<Element> {
    /// Return `true` iff `x < y`.
    fn lt(&mut self, x: &Element, y: &Element) -> bool;

    /// Called when the element `e` is moved to the new position `new_index`.
    fn on_move(&mut self, e: &mut Element, new_index: usize) {
        let _ = (e, new_index);
    }
}

impl<T: Ord> BinaryHeapCtx<T> for () {
    fn lt(&mut self, x: &T, y: &T) -> bool {
        *x < *y
    }
}

/// Min-heap.
pub(crate) trait BinaryHeap {
    type Element;

    /// Remove the least item from the heap and return it.
    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<Self::Element>) -> Option<Self::Element>;

    /// Remove the item at the specified position and return it.
    fn heap_remove(
        &mut self,
        i: usize,
        ctx: impl BinaryHeapCtx<Self::Element>,
    ) -> Option<Self::Element>;

    /// Push an item onto the heap and return its position.
    fn heap_push(&mut self, item: Self::Element, ctx: impl BinaryHeapCtx<Self::Element>) -> usize;
}

impl<T> BinaryHeap for Vec<T> {
    type Element = T;

    fn heap_pop(&mut self, ctx: impl BinaryHeapCtx<T>) -> Option<T> {
        self.heap_remove(0, ctx)
    }

    fn heap_remove(&mut self, i: usize, mut ctx: impl BinaryHeapCtx<T>) -> Option<T> {
        if i >= self.len() {
            return None;
        }

        let item = self.swap_remove(i);
        if i < self.len() {
            // The last item now occupies `i`
            ctx.on_move(&mut self[i], i);

            if i > 0 && ctx.lt(&self[i], &self[(i - 1) / 2]) {
                sift_up(self, i, &mut ctx);
            } else {
                sift_down(self, i, &mut ctx);
            }
        }
        Some(item)
    }

    fn heap_push(&mut self, item: T, mut ctx: impl BinaryHeapCtx<T>) -> usize {
        let i = self.len();
        self.push(item);
        ctx.on_move(&mut self[i], i);
        sift_up(self, i, &mut ctx)
    }
}

/// Move the element at `pos` towards the root while it's less than its
/// parent. Returns the final position.
fn sift_up<T>(this: &mut [T], mut pos: usize, ctx: &mut impl BinaryHeapCtx<T>) -> usize {
    while pos > 0 {
        let parent = (pos - 1) / 2;
        if !ctx.lt(&this[pos], &this[parent]) {
            break;
        }

        this.swap(pos, parent);
        ctx.on_move(&mut this[pos], pos);
        ctx.on_move(&mut this[parent], parent);
        pos = parent;
    }
    pos
}

/// Move the element at `pos` towards the leaves while one of its children
/// is less than it.
fn sift_down<T>(this: &mut [T], mut pos: usize, ctx: &mut impl BinaryHeapCtx<T>) {
    let end = this.len();
    loop {
        let mut child = 2 * pos + 1;
        if child >= end {
            break;
        }

        // compare with the lesser of the two children
        let right = child + 1;
        if right < end && !ctx.lt(&this[child], &this[right]) {
            child = right;
        }

        // if we are already in order, stop.
        if !ctx.lt(&this[child], &this[pos]) {
            break;
        }

        this.swap(pos, child);
        ctx.on_move(&mut this[pos], pos);
        ctx.on_move(&mut this[child], child);
        pos = child;
    }
}
