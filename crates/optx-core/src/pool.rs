//! # Lock-free Object Pool
//!
//! [`SyncPool`] preallocates a fixed number of boxed objects and hands them out
//! and takes them back without a lock on the hot path.
//!
//! Free slots form a Treiber stack threaded through an array of `next` links,
//! one per slot. The head word packs a 32-bit slot index with a 32-bit tag that
//! changes on every push and pop, so a head that was popped and pushed back
//! between a load and a compare-and-swap is not mistaken for the same state.
//!
//! Each pooled object remembers its own slot through [`Poolable`]. Objects made
//! after the pool ran dry carry no slot; they are counted as fallbacks and simply
//! dropped on recycle.

use crossbeam::atomic::AtomicCell;
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

const NIL: u32 = u32::MAX;

/// An object that can live in a [`SyncPool`].
pub trait Poolable: Default + Send {
    fn slot(&self) -> Option<u32>;

    fn set_slot(&mut self, slot: Option<u32>);

    /// Clears the object for reuse. Must leave the slot untouched.
    fn reset(&mut self);
}

fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

pub struct SyncPool<T: Poolable> {
    slots: Box<[AtomicCell<Option<Box<T>>>]>,
    next: Box<[AtomicU32]>,
    head: AtomicU64,
    free: AtomicUsize,
    outstanding: AtomicUsize,
    fallbacks: AtomicUsize,
}

impl<T: Poolable> SyncPool<T> {
    /// Preallocates `capacity` objects.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero or does not fit a 32-bit slot index.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be positive");
        assert!(capacity < NIL as usize, "pool capacity {capacity} too large");

        let slots = (0..capacity)
            .map(|i| {
                let mut obj = Box::<T>::default();
                obj.set_slot(Some(i as u32));
                AtomicCell::new(Some(obj))
            })
            .collect();
        let next = (0..capacity)
            .map(|i| {
                let link = if i + 1 < capacity { i as u32 + 1 } else { NIL };
                AtomicU32::new(link)
            })
            .collect();

        Self {
            slots,
            next,
            head: AtomicU64::new(pack(0, 0)),
            free: AtomicUsize::new(capacity),
            outstanding: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently on the free list.
    pub fn available(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    /// Objects handed out and not yet recycled, fallbacks included.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Takes a free object, or heap-allocates one if the pool is empty.
    /// Never blocks.
    pub fn retrieve(&self) -> Box<T> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if let Some(index) = self.pop() {
            if let Some(obj) = self.slots[index as usize].take() {
                self.free.fetch_sub(1, Ordering::AcqRel);
                return obj;
            }
            // The slot was on the free list without its object. Keep the
            // index off the list and serve from the heap instead.
            warn!(slot = index, "pool slot was empty");
        }
        if self.fallbacks.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!(capacity = self.capacity(), "pool exhausted, allocating from the heap");
        }
        let mut obj = Box::<T>::default();
        obj.set_slot(None);
        obj
    }

    /// Returns an object to the pool. Safe to call concurrently with
    /// [`retrieve`](Self::retrieve) and other recycles.
    pub fn recycle(&self, mut obj: Box<T>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        obj.reset();
        let Some(index) = obj.slot() else {
            return;
        };
        let Some(cell) = self.slots.get(index as usize) else {
            warn!(slot = index, "object recycled into a pool it does not belong to");
            return;
        };
        let previous = cell.swap(Some(obj));
        debug_assert!(previous.is_none(), "slot {index} recycled twice");
        self.free.fetch_add(1, Ordering::AcqRel);
        self.push(index);
    }

    fn pop(&self) -> Option<u32> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let (tag, index) = unpack(head);
            if index == NIL {
                return None;
            }
            let next = self.next[index as usize].load(Ordering::Acquire);
            let new = pack(tag.wrapping_add(1), next);
            if self
                .head
                .compare_exchange_weak(head, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(index);
            }
            backoff.spin();
        }
    }

    fn push(&self, index: u32) {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let (tag, top) = unpack(head);
            self.next[index as usize].store(top, Ordering::Release);
            let new = pack(tag.wrapping_add(1), index);
            if self
                .head
                .compare_exchange_weak(head, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }
}
