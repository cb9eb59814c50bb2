use log::{debug, trace};
use std::num::NonZeroUsize;

use crate::layout::Slot;

/// Slot storage split into fixed-width rows.
///
/// Rows are allocated one at a time as the store grows and are never moved
/// afterwards; only the directory of row pointers is reallocated when it fills up.
pub struct RowStore<T> {
    /// One boxed row per allocated row. `len()` is the number of live rows,
    /// `capacity()` is the directory size.
    rows: Vec<Box<[Option<T>]>>,
    row_shift: u32,
    row_mask: usize,
}

impl<T> RowStore<T> {
    /// Creates a store with a directory of `initial_rows` entries and one allocated row.
    pub fn new(row_shift: u32, initial_rows: NonZeroUsize) -> Self {
        debug_assert!(row_shift < usize::BITS);

        let mut store = RowStore {
            rows: Vec::with_capacity(initial_rows.get()),
            row_shift,
            row_mask: (1usize << row_shift) - 1,
        };
        store.add_row();
        store
    }

    /// Number of slots per row.
    #[inline(always)]
    pub fn row_width(&self) -> usize {
        1 << self.row_shift
    }

    /// Number of slots backed by allocated rows.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.rows.len() << self.row_shift
    }

    /// Number of allocated rows.
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of row pointers the directory can hold before it has to grow.
    pub fn directory_capacity(&self) -> usize {
        self.rows.capacity()
    }

    /// Allocates rows until `slot` is backed by storage.
    pub fn ensure_capacity_for(&mut self, slot: Slot) {
        while slot as usize >= self.capacity() {
            self.add_row();
        }
    }

    /// Appends one empty row, doubling the directory first if it is full.
    pub fn add_row(&mut self) {
        if self.rows.len() == self.rows.capacity() {
            let additional = self.rows.capacity().max(1);
            self.rows.reserve_exact(additional);
            debug!(
                "Row directory grown to {} entries ({} slots).",
                self.rows.capacity(),
                self.rows.capacity() << self.row_shift
            );
        }

        let row: Box<[Option<T>]> = std::iter::repeat_with(|| None)
            .take(self.row_width())
            .collect();
        self.rows.push(row);
        trace!("Allocated row {} (capacity {}).", self.rows.len() - 1, self.capacity());
    }

    /// Releases the last row once `next`, the first free slot, sits at least two
    /// full rows below the capacity. Returns whether a row was released.
    pub fn shrink_for(&mut self, next: Slot) -> bool {
        if next as usize + 2 * self.row_width() > self.capacity() {
            return false;
        }

        if let Some(row) = self.rows.pop() {
            debug_assert!(row.iter().all(Option::is_none), "released row still holds items");
            trace!("Released row {} (capacity {}).", self.rows.len(), self.capacity());
        }
        true
    }

    #[inline(always)]
    fn locate(&self, slot: Slot) -> (usize, usize) {
        let slot = slot as usize;
        (slot >> self.row_shift, slot & self.row_mask)
    }

    #[inline(always)]
    fn slot_mut(&mut self, slot: Slot) -> &mut Option<T> {
        let (row, col) = self.locate(slot);
        &mut self.rows[row][col]
    }

    /// Returns the item at `slot`, if the slot is backed and occupied.
    #[inline]
    pub fn get(&self, slot: Slot) -> Option<&T> {
        let (row, col) = self.locate(slot);
        self.rows.get(row).and_then(|r| r[col].as_ref())
    }

    /// Removes and returns the item at `slot`. Panics if the slot is not backed.
    #[inline]
    pub fn take(&mut self, slot: Slot) -> Option<T> {
        self.slot_mut(slot).take()
    }

    /// Stores `item` at `slot`, returning the previous occupant. Panics if the slot is not backed.
    #[inline]
    pub fn put(&mut self, slot: Slot, item: T) -> Option<T> {
        self.slot_mut(slot).replace(item)
    }

    /// Exchanges the contents of two backed slots.
    #[inline]
    pub fn swap(&mut self, u: Slot, v: Slot) {
        let (row_u, col_u) = self.locate(u);
        let (row_v, col_v) = self.locate(v);

        if row_u == row_v {
            self.rows[row_u].swap(col_u, col_v);
        } else {
            let moved = self.rows[row_u][col_u].take();
            let displaced = std::mem::replace(&mut self.rows[row_v][col_v], moved);
            self.rows[row_u][col_u] = displaced;
        }
    }
}
