use log::warn;
use std::fmt;

use crate::{
    config::HeapConfig,
    error::{HeapError, Result},
    layout::{Layout, NO_SLOT, ROOT, Slot},
    row_store::RowStore,
};

/// Ordering and position tracking supplied by the owner of the items.
pub trait HeapDelegate<T> {
    /// Returns true iff `a` belongs nearer the root than `b`.
    /// Must be a strict weak ordering; flipping it turns a min-heap into a max-heap.
    fn less(&self, a: &T, b: &T) -> bool;

    /// Called whenever `item` lands on a new slot, and with `None` once it leaves the heap.
    fn reindex(&mut self, item: &T, slot: Option<Slot>);
}

/// A [`HeapDelegate`] built from two closures.
pub struct FnDelegate<L, R> {
    less: L,
    reindex: R,
}

impl<L, R> FnDelegate<L, R> {
    pub fn new<T>(less: L, reindex: R) -> Self
    where
        L: Fn(&T, &T) -> bool,
        R: FnMut(&T, Option<Slot>),
    {
        FnDelegate { less, reindex }
    }
}

impl<T, L, R> HeapDelegate<T> for FnDelegate<L, R>
where
    L: Fn(&T, &T) -> bool,
    R: FnMut(&T, Option<Slot>),
{
    #[inline(always)]
    fn less(&self, a: &T, b: &T) -> bool {
        (self.less)(a, b)
    }

    #[inline(always)]
    fn reindex(&mut self, item: &T, slot: Option<Slot>) {
        (self.reindex)(item, slot)
    }
}

/// A binary heap over caller-owned item handles.
///
/// Every item is told its slot through [`HeapDelegate::reindex`], which lets the
/// owner delete or reorder it in O(log n) without searching. Items are stored in
/// rows that never move once allocated.
pub struct BinHeap<T, D> {
    delegate: D,
    store: RowStore<T>,
    layout: Layout,
    /// First free slot. The heap holds `next - 1` items.
    next: Slot,
}

impl<T, D: HeapDelegate<T>> BinHeap<T, D> {
    /// Creates an empty heap with the default configuration.
    pub fn new(delegate: D) -> Self {
        let config = HeapConfig::default();
        let layout = config.validate().unwrap_or_else(|e| {
            warn!("Default heap configuration rejected ({}), using the flat layout.", e);
            Layout::Flat
        });
        Self::from_parts(&config, layout, delegate)
    }

    /// Creates an empty heap after validating `config`.
    pub fn with_config(config: HeapConfig, delegate: D) -> Result<Self> {
        let layout = config.validate()?;
        Ok(Self::from_parts(&config, layout, delegate))
    }

    fn from_parts(config: &HeapConfig, layout: Layout, delegate: D) -> Self {
        BinHeap {
            delegate,
            store: RowStore::new(config.row_shift, config.initial_rows),
            layout,
            next: ROOT,
        }
    }

    /// Number of items in the heap.
    #[inline(always)]
    pub fn len(&self) -> usize {
        (self.next - ROOT) as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.next == ROOT
    }

    /// Number of slots backed by allocated rows.
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Mutable access to the delegate, e.g. to change an item's key before [`Self::reorder`].
    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    /// Returns the item nearest the root, if any.
    #[inline]
    pub fn root(&self) -> Option<&T> {
        self.store.get(ROOT)
    }

    /// Returns the item at `slot`, if occupied.
    pub fn get(&self, slot: Slot) -> Option<&T> {
        if self.is_occupied(slot) {
            self.store.get(slot)
        } else {
            None
        }
    }

    /// Iterates over all items with their slots, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        (ROOT..self.next).filter_map(|slot| self.store.get(slot).map(|item| (slot, item)))
    }

    /// Inserts `item` and returns the slot it settled on.
    ///
    /// The item must not already be in the heap.
    pub fn insert(&mut self, item: T) -> Result<Slot> {
        if self.next == NO_SLOT {
            return Err(HeapError::Full(self.len()));
        }

        self.store.ensure_capacity_for(self.next);
        let slot = self.next;
        self.next += 1;

        let previous = self.store.put(slot, item);
        debug_assert!(previous.is_none(), "tail slot {} was not empty", slot);
        self.notify(slot);

        Ok(self.trickle_up(slot))
    }

    /// Removes and returns the item at `slot`.
    ///
    /// The removed item is reindexed to `None`. The tail item takes its place and is
    /// moved up or down from there.
    pub fn delete(&mut self, slot: Slot) -> Result<T> {
        self.check_slot(slot)?;

        let Some(removed) = self.store.take(slot) else {
            unreachable!("occupied slot {} is empty", slot);
        };
        self.delegate.reindex(&removed, None);

        self.next -= 1;
        let tail = self.next;
        if slot != tail {
            let Some(moved) = self.store.take(tail) else {
                unreachable!("tail slot {} is empty", tail);
            };
            self.store.put(slot, moved);
            self.notify(slot);

            let slot = self.trickle_up(slot);
            self.trickle_down(slot);
        }

        self.store.shrink_for(self.next);
        Ok(removed)
    }

    /// Restores the heap order around `slot` after its item's key was changed.
    /// Returns the slot the item ends up on.
    pub fn reorder(&mut self, slot: Slot) -> Result<Slot> {
        self.check_slot(slot)?;

        let slot = self.trickle_up(slot);
        Ok(self.trickle_down(slot))
    }

    /// Removes and returns the root item.
    pub fn pop(&mut self) -> Option<T> {
        self.delete(ROOT).ok()
    }

    /// Removes all items, reindexing each to `None`. Storage shrinks back to two rows,
    /// the slack the shrink policy always keeps.
    pub fn clear(&mut self) {
        while self.next > ROOT {
            self.next -= 1;
            if let Some(item) = self.store.take(self.next) {
                self.delegate.reindex(&item, None);
            }
        }
        while self.store.shrink_for(self.next) {}
    }

    /// Verifies the heap order over all occupied slots.
    pub fn check(&self) -> Result<()> {
        for child in (ROOT + 1)..self.next {
            let parent = self.layout.parent(child);
            if self.less_at(child, parent) {
                return Err(HeapError::OrderViolation { parent, child });
            }
        }
        Ok(())
    }

    /// Tears the heap down. A heap that still holds items is handed back.
    pub fn destroy(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    // ----------------
    // --- Internal ---
    // ----------------

    #[inline(always)]
    fn is_occupied(&self, slot: Slot) -> bool {
        slot >= ROOT && slot < self.next
    }

    fn check_slot(&self, slot: Slot) -> Result<()> {
        if self.is_empty() {
            return Err(HeapError::Empty);
        }
        if !self.is_occupied(slot) {
            return Err(HeapError::InvalidSlot {
                slot,
                len: self.len(),
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn item(&self, slot: Slot) -> &T {
        debug_assert!(self.is_occupied(slot), "slot {} is not occupied", slot);
        match self.store.get(slot) {
            Some(item) => item,
            None => unreachable!("occupied slot {} is empty", slot),
        }
    }

    /// Compares two occupied slots.
    #[inline(always)]
    fn less_at(&self, u: Slot, v: Slot) -> bool {
        self.delegate.less(self.item(u), self.item(v))
    }

    /// Tells the item at `slot` where it lives now.
    #[inline(always)]
    fn notify(&mut self, slot: Slot) {
        if let Some(item) = self.store.get(slot) {
            self.delegate.reindex(item, Some(slot));
        }
    }

    /// Exchanges two occupied slots and reindexes both items.
    #[inline(always)]
    fn swap(&mut self, u: Slot, v: Slot) {
        self.store.swap(u, v);
        self.notify(u);
        self.notify(v);
    }

    /// Moves the item at `u` towards the root while it beats its parent.
    fn trickle_up(&mut self, mut u: Slot) -> Slot {
        while u > ROOT {
            let parent = self.layout.parent(u);
            debug_assert!(parent < u);

            if !self.less_at(u, parent) {
                break; // Parent is at least as near the root => order restored
            }

            self.swap(u, parent);
            u = parent;
        }
        u
    }

    /// Moves the item at `u` away from the root while its better child beats it.
    fn trickle_down(&mut self, mut u: Slot) -> Slot {
        loop {
            let (left, right) = self.layout.children(u);
            if left >= self.next {
                return u; // No children
            }

            // Find the better child
            let mut best = left;
            if right != left && right < self.next && self.less_at(right, left) {
                best = right;
            }

            if !self.less_at(best, u) {
                return u; // Child does not beat the parent => order restored
            }

            self.swap(u, best);
            u = best;
        }
    }
}

impl<T, D> Drop for BinHeap<T, D> {
    fn drop(&mut self) {
        if self.next > ROOT {
            warn!(
                "Dropping a heap that still holds {} item(s).",
                self.next - ROOT
            );
        }
    }
}

impl<T, D> fmt::Debug for BinHeap<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinHeap")
            .field("len", &(self.next - ROOT))
            .field("capacity", &self.store.capacity())
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutKind;
    use std::{cell::Cell, rc::Rc};

    /// Items are ids into a record table owned by the delegate.
    #[derive(Default)]
    struct Records {
        keys: Vec<u64>,
        slots: Vec<Option<Slot>>,
        /// Every reindex call in order.
        log: Vec<(usize, Option<Slot>)>,
    }

    impl Records {
        fn add(&mut self, key: u64) -> usize {
            self.keys.push(key);
            self.slots.push(None);
            self.keys.len() - 1
        }
    }

    impl HeapDelegate<usize> for Records {
        fn less(&self, a: &usize, b: &usize) -> bool {
            self.keys[*a] < self.keys[*b]
        }

        fn reindex(&mut self, item: &usize, slot: Option<Slot>) {
            self.slots[*item] = slot;
            self.log.push((*item, slot));
        }
    }

    fn small_config(layout: LayoutKind) -> HeapConfig {
        HeapConfig::default()
            .with_row_shift(3)
            .with_page_size(4)
            .with_layout(layout)
    }

    fn heap_with(config: HeapConfig) -> BinHeap<usize, Records> {
        BinHeap::with_config(config, Records::default()).unwrap()
    }

    fn insert_key(heap: &mut BinHeap<usize, Records>, key: u64) -> usize {
        let id = heap.delegate_mut().add(key);
        heap.insert(id).unwrap();
        id
    }

    fn root_key(heap: &BinHeap<usize, Records>) -> Option<u64> {
        heap.root().map(|&id| heap.delegate().keys[id])
    }

    fn assert_slots_match(heap: &BinHeap<usize, Records>) {
        let mut found = 0;
        for (slot, &id) in heap.iter() {
            assert_eq!(heap.delegate().slots[id], Some(slot), "item {} misplaced", id);
            found += 1;
        }
        assert_eq!(found, heap.len());
    }

    fn drain_keys(heap: &mut BinHeap<usize, Records>) -> Vec<u64> {
        let mut keys = Vec::with_capacity(heap.len());
        while let Some(id) = heap.pop() {
            keys.push(heap.delegate().keys[id]);
        }
        keys
    }

    #[test]
    fn test_example_scenario() {
        for layout in [LayoutKind::Paged, LayoutKind::Flat] {
            let mut heap = heap_with(small_config(layout));
            let mut ids = Vec::new();
            for key in [5, 3, 8, 1, 9, 2] {
                ids.push(insert_key(&mut heap, key));
            }
            assert_eq!(heap.len(), 6);
            assert_eq!(root_key(&heap), Some(1));

            let root = heap.pop().unwrap();
            assert_eq!(heap.delegate().keys[root], 1);
            assert_eq!(heap.delegate().slots[root], None);
            assert_eq!(root_key(&heap), Some(2));

            // Re-key the item holding 9 to 0
            let nine = ids[4];
            heap.delegate_mut().keys[nine] = 0;
            let slot = heap.delegate().slots[nine].unwrap();
            assert_eq!(heap.reorder(slot), Ok(ROOT));
            assert_eq!(heap.root(), Some(&nine));
            assert_eq!(heap.delegate().slots[nine], Some(ROOT));

            assert!(heap.check().is_ok());
            assert_slots_match(&heap);
            assert_eq!(drain_keys(&mut heap), vec![0, 2, 3, 5, 8]);
        }
    }

    #[test]
    fn test_random_drain_is_sorted() {
        let mut rng = fastrand::Rng::with_seed(12345);
        let mut keys: Vec<u64> = (0..1000).collect();
        rng.shuffle(&mut keys);

        for config in [
            HeapConfig::default(),
            small_config(LayoutKind::Paged),
            small_config(LayoutKind::Flat),
        ] {
            let mut heap = heap_with(config);
            for &key in &keys {
                insert_key(&mut heap, key);
            }
            assert_eq!(heap.len(), 1000);
            assert_eq!(drain_keys(&mut heap), (0..1000).collect::<Vec<_>>());
            assert!(heap.is_empty());
        }
    }

    #[test]
    fn test_delete_last_item() {
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        let a = insert_key(&mut heap, 7);
        let b = insert_key(&mut heap, 3);

        let slot = heap.delegate().slots[a].unwrap();
        assert_eq!(heap.delete(slot), Ok(a));
        assert_eq!(heap.len(), 1);

        heap.delegate_mut().log.clear();
        assert_eq!(heap.delete(ROOT), Ok(b));
        assert_eq!(heap.len(), 0);
        assert_eq!(heap.root(), None);
        // No trickle on the last item, only the removal notice
        assert_eq!(heap.delegate().log, vec![(b, None)]);

        assert!(heap.destroy().is_ok());
    }

    #[test]
    fn test_destroy_non_empty_is_rejected() {
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        insert_key(&mut heap, 1);

        let mut heap = heap.destroy().unwrap_err();
        assert_eq!(heap.len(), 1);
        heap.pop();
        assert!(heap.destroy().is_ok());
    }

    #[test]
    fn test_contract_violations() {
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        assert_eq!(heap.delete(ROOT), Err(HeapError::Empty));
        assert_eq!(heap.reorder(ROOT), Err(HeapError::Empty));
        assert_eq!(heap.pop(), None);

        insert_key(&mut heap, 4);
        insert_key(&mut heap, 2);
        assert_eq!(heap.delete(0), Err(HeapError::InvalidSlot { slot: 0, len: 2 }));
        assert_eq!(heap.delete(3), Err(HeapError::InvalidSlot { slot: 3, len: 2 }));
        assert_eq!(
            heap.reorder(NO_SLOT),
            Err(HeapError::InvalidSlot {
                slot: NO_SLOT,
                len: 2
            })
        );
        assert_eq!(heap.get(3), None);
        assert_eq!(heap.len(), 2);
        assert!(heap.check().is_ok());
        heap.clear();
    }

    #[test]
    fn test_deleted_item_is_unreachable() {
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        let ids: Vec<usize> = (0..40).map(|k| insert_key(&mut heap, (k * 7) % 41)).collect();

        let victim = ids[17];
        let slot = heap.delegate().slots[victim].unwrap();
        assert_eq!(heap.delete(slot), Ok(victim));

        assert_eq!(heap.delegate().slots[victim], None);
        assert!(heap.iter().all(|(_, &id)| id != victim));
        assert_eq!(heap.len(), 39);
        assert_slots_match(&heap);
        assert!(heap.check().is_ok());
        heap.clear();
    }

    #[test]
    fn test_ties_keep_heap_order() {
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        for k in 0..200u64 {
            insert_key(&mut heap, k % 3);
        }
        assert!(heap.check().is_ok());

        let drained = drain_keys(&mut heap);
        assert!(drained.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(drained.len(), 200);
    }

    #[test]
    fn test_flipped_comparator_is_max_heap() {
        let delegate = FnDelegate::new(|a: &u32, b: &u32| a > b, |_: &u32, _: Option<Slot>| {});
        let mut heap = BinHeap::new(delegate);
        for v in [4, 9, 1, 7] {
            heap.insert(v).unwrap();
        }
        assert_eq!(heap.root(), Some(&9));
        assert_eq!(heap.pop(), Some(9));
        assert_eq!(heap.pop(), Some(7));
        heap.clear();
        assert!(heap.is_empty());
    }

    #[test]
    fn test_fn_delegate_with_shared_items() {
        struct Node {
            key: Cell<u32>,
            slot: Cell<Option<Slot>>,
        }

        let delegate = FnDelegate::new(
            |a: &Rc<Node>, b: &Rc<Node>| a.key.get() < b.key.get(),
            |n: &Rc<Node>, slot: Option<Slot>| n.slot.set(slot),
        );
        let config = small_config(LayoutKind::Paged);
        let mut heap = BinHeap::with_config(config, delegate).unwrap();

        let nodes: Vec<Rc<Node>> = (0..50)
            .map(|k| {
                Rc::new(Node {
                    key: Cell::new(100 - k),
                    slot: Cell::new(None),
                })
            })
            .collect();
        for node in &nodes {
            heap.insert(Rc::clone(node)).unwrap();
        }
        assert_eq!(heap.root().map(|n| n.key.get()), Some(51));

        nodes[0].key.set(0);
        let slot = heap.reorder(nodes[0].slot.get().unwrap()).unwrap();
        assert_eq!(slot, ROOT);
        assert_eq!(nodes[0].slot.get(), Some(ROOT));

        for node in &nodes {
            let (slot, found) = heap
                .iter()
                .find(|(_, n)| Rc::ptr_eq(n, node))
                .unwrap();
            assert_eq!(node.slot.get(), Some(slot));
            assert!(Rc::ptr_eq(found, node));
        }

        heap.clear();
        assert!(nodes.iter().all(|n| n.slot.get().is_none()));
    }

    #[test]
    fn test_rows_grow_and_shrink_with_hysteresis() {
        // 8 slots per row
        let mut heap = heap_with(small_config(LayoutKind::Paged));
        assert_eq!(heap.capacity(), 8);

        for k in 0..40 {
            insert_key(&mut heap, k);
        }
        // Slots 1..=40 need 6 rows
        assert_eq!(heap.capacity(), 48);

        // Hovering around a row boundary does not release anything
        for _ in 0..10 {
            let id = heap.pop().unwrap();
            heap.insert(id).unwrap();
        }
        assert_eq!(heap.capacity(), 48);

        // One row goes once next drops to 32, the next only at 24
        while heap.len() > 24 {
            heap.pop();
        }
        assert_eq!(heap.capacity(), 40);

        while heap.pop().is_some() {}
        assert_eq!(heap.capacity(), 16);
        assert!(heap.destroy().is_ok());
    }

    #[test]
    fn test_layouts_agree() {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut paged = heap_with(small_config(LayoutKind::Paged));
        let mut flat = heap_with(small_config(LayoutKind::Flat));

        for _ in 0..2000 {
            let key = rng.u64(0..500);
            insert_key(&mut paged, key);
            insert_key(&mut flat, key);
            if rng.u8(0..4) == 0 {
                let p = paged.pop().map(|id| paged.delegate().keys[id]);
                let f = flat.pop().map(|id| flat.delegate().keys[id]);
                assert_eq!(p, f);
            }
        }
        assert_eq!(drain_keys(&mut paged), drain_keys(&mut flat));
    }

    /// Mirrors a long-running cache: replace roots, drain, then mix deletes,
    /// re-keys and inserts on random items.
    #[test]
    fn test_randomized_workload() {
        const N: usize = 3001;
        const M: usize = 12007;

        let mut rng = fastrand::Rng::with_seed(1);
        let mut heap = heap_with(
            HeapConfig::default()
                .with_row_shift(6)
                .with_page_size(16),
        );
        let mut present: Vec<Option<usize>> = vec![None; N];
        // Position in `present` for every item id ever inserted
        let mut owner: Vec<usize> = Vec::new();

        for round in 0..2 {
            heap.clear();
            present.fill(None);

            let mut last = 0;
            for n in 0..N {
                last = rng.u64(..);
                present[n] = Some(insert_key(&mut heap, last));
                owner.push(n);
                assert_eq!(heap.delegate().slots[*heap.root().unwrap()], Some(ROOT));
                assert!(root_key(&heap).unwrap() <= last);
            }

            for _ in 0..M {
                let id = *heap.root().unwrap();
                assert!(heap.delegate().keys[id] <= last);
                assert_eq!(heap.delete(ROOT), Ok(id));

                let n = owner[id];
                last = rng.u64(..);
                present[n] = Some(insert_key(&mut heap, last));
                owner.push(n);
            }

            let mut prev = 0;
            for p in present.iter_mut() {
                let id = heap.pop().unwrap();
                let key = heap.delegate().keys[id];
                assert!(key >= prev, "round {}: drain went backwards", round);
                prev = key;
                *p = None;
            }
            assert!(heap.is_empty());

            for _ in 0..M {
                let n = rng.usize(0..N);
                match present[n] {
                    Some(id) if heap.delegate().keys[id] & 1 == 1 => {
                        let slot = heap.delegate().slots[id].unwrap();
                        assert_eq!(heap.delete(slot), Ok(id));
                        assert_eq!(heap.delegate().slots[id], None);
                        present[n] = None;
                    }
                    Some(id) => {
                        heap.delegate_mut().keys[id] = rng.u64(..);
                        let slot = heap.delegate().slots[id].unwrap();
                        let settled = heap.reorder(slot).unwrap();
                        assert_eq!(heap.delegate().slots[id], Some(settled));
                    }
                    None => {
                        let key = rng.u64(..);
                        present[n] = Some(insert_key(&mut heap, key));
                        owner.push(n);
                    }
                }
            }
            assert!(heap.check().is_ok());
            assert_slots_match(&heap);
            assert_eq!(heap.len(), present.iter().flatten().count());
        }

        heap.clear();
        assert!(heap.destroy().is_ok());
    }
}
