use log::debug;

use crate::{
    config::HeapConfig,
    error::{HeapError, Result},
    heap::{BinHeap, HeapDelegate},
    layout::{ROOT, Slot},
};

/// Handle to a scheduled timer. Stays unique after the timer is gone, so a stale
/// handle never reaches a newer timer that reused the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

struct Timer<V> {
    deadline: u64,
    generation: u32,
    /// Current heap slot, maintained by the heap through `reindex`.
    slot: Option<Slot>,
    value: Option<V>,
}

/// Timer records, doubling as the heap's delegate.
struct Timers<V> {
    records: Vec<Timer<V>>,
    free: Vec<u32>,
}

impl<V> Timers<V> {
    fn live(&self, id: TimerId) -> Option<&Timer<V>> {
        self.records
            .get(id.index as usize)
            .filter(|t| t.generation == id.generation && t.value.is_some())
    }

    fn live_mut(&mut self, id: TimerId) -> Option<&mut Timer<V>> {
        self.records
            .get_mut(id.index as usize)
            .filter(|t| t.generation == id.generation && t.value.is_some())
    }

    fn allocate(&mut self, deadline: u64, value: V) -> TimerId {
        match self.free.pop() {
            Some(index) => {
                let timer = &mut self.records[index as usize];
                timer.deadline = deadline;
                timer.value = Some(value);
                TimerId {
                    index,
                    generation: timer.generation,
                }
            }
            None => {
                let index = self.records.len() as u32;
                self.records.push(Timer {
                    deadline,
                    generation: 0,
                    slot: None,
                    value: Some(value),
                });
                TimerId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Frees the record behind `index` and returns its value.
    ///
    /// A record whose generation is exhausted is retired instead of reused, so no
    /// stale id can ever match it again.
    fn release(&mut self, index: u32) -> Option<V> {
        let timer = &mut self.records[index as usize];
        debug_assert!(timer.slot.is_none(), "released timer is still queued");
        let value = timer.value.take();
        match timer.generation.checked_add(1) {
            Some(generation) => {
                timer.generation = generation;
                self.free.push(index);
            }
            None => debug!("Retired timer record {} after its last generation.", index),
        }
        value
    }
}

impl<V> HeapDelegate<u32> for Timers<V> {
    #[inline(always)]
    fn less(&self, a: &u32, b: &u32) -> bool {
        self.records[*a as usize].deadline < self.records[*b as usize].deadline
    }

    #[inline(always)]
    fn reindex(&mut self, item: &u32, slot: Option<Slot>) {
        self.records[*item as usize].slot = slot;
    }
}

/// Deadline-ordered timers with O(log n) cancel and reschedule.
///
/// Deadlines are opaque `u64` ticks; the caller picks the clock.
pub struct ExpiryQueue<V> {
    heap: BinHeap<u32, Timers<V>>,
}

impl<V> Default for ExpiryQueue<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiryQueue<V> {
    pub fn new() -> Self {
        ExpiryQueue {
            heap: BinHeap::new(Self::empty_timers()),
        }
    }

    pub fn with_config(config: HeapConfig) -> Result<Self> {
        Ok(ExpiryQueue {
            heap: BinHeap::with_config(config, Self::empty_timers())?,
        })
    }

    fn empty_timers() -> Timers<V> {
        Timers {
            records: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `value` to expire at `deadline`.
    pub fn schedule(&mut self, deadline: u64, value: V) -> Result<TimerId> {
        let id = self.heap.delegate_mut().allocate(deadline, value);
        if let Err(e) = self.heap.insert(id.index) {
            self.heap.delegate_mut().release(id.index);
            return Err(e);
        }
        Ok(id)
    }

    /// Moves a pending timer to a new deadline.
    pub fn reschedule(&mut self, id: TimerId, deadline: u64) -> Result<()> {
        let timer = self
            .heap
            .delegate_mut()
            .live_mut(id)
            .ok_or(HeapError::StaleTimer)?;
        timer.deadline = deadline;
        let slot = timer.slot.ok_or(HeapError::StaleTimer)?;

        self.heap.reorder(slot).map(|_| ())
    }

    /// Cancels a pending timer and returns its value.
    /// Returns `None` for timers that already expired or were cancelled.
    pub fn cancel(&mut self, id: TimerId) -> Option<V> {
        let slot = self.heap.delegate().live(id)?.slot?;
        let index = self.heap.delete(slot).ok()?;
        debug_assert_eq!(index, id.index);
        self.heap.delegate_mut().release(index)
    }

    /// Deadline of a pending timer.
    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.heap.delegate().live(id).map(|t| t.deadline)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        let &index = self.heap.root()?;
        Some(self.heap.delegate().records[index as usize].deadline)
    }

    /// Removes and returns the earliest timer if its deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: u64) -> Option<(TimerId, u64, V)> {
        if self.next_deadline()? > now {
            return None;
        }

        let index = self.heap.delete(ROOT).ok()?;
        let timers = self.heap.delegate_mut();
        let timer = &timers.records[index as usize];
        let (id, deadline) = (
            TimerId {
                index,
                generation: timer.generation,
            },
            timer.deadline,
        );
        let value = timers.release(index)?;
        Some((id, deadline, value))
    }
}

impl<V> Drop for ExpiryQueue<V> {
    fn drop(&mut self) {
        // The queue owns its timers, so dropping pending ones is fine
        self.heap.clear();
    }
}
