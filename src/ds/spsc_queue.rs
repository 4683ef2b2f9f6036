//! Bounded single-producer/single-consumer ring buffer.
//!
//! A fixed array of slots, each carrying its own sequence number. The
//! producer and consumer never share a lock; the acquire/release pairing on a
//! slot's sequence is what makes the payload write visible to the reader.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                     BoundedSpscQueue<T> (capacity 4)                 │
//!   │                                                                      │
//!   │   head (producer, CachePadded)  = 6                                  │
//!   │   tail (consumer, CachePadded)  = 4                                  │
//!   │                                                                      │
//!   │   index = counter & mask (mask = 3)                                  │
//!   │                                                                      │
//!   │   slot[0] seq=5  value=Some  ◄── tail (4) reads here when seq == 5   │
//!   │   slot[1] seq=6  value=Some                                          │
//!   │   slot[2] seq=6  value=None  ◄── head (6) writes here when seq == 6  │
//!   │   slot[3] seq=7  value=None                                          │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Slot Protocol
//!
//! ```text
//!   push at counter i              pop at counter i
//!   ───────────────────            ───────────────────
//!   seq == i ?  (Acquire)          seq == i + 1 ?  (Acquire)
//!   CAS head i -> i + 1            CAS tail i -> i + 1
//!   write value                    read value
//!   seq = i + 1 (Release)          seq = i + capacity (Release)
//! ```
//!
//! Counters are `usize` and only ever increase; wraparound happens through the
//! mask, not through the counters.
//!
//! ## Performance Characteristics
//!
//! | Operation  | Time | Notes                                      |
//! |------------|------|--------------------------------------------|
//! | `try_push` | O(1) | Never blocks; `Err(value)` when full       |
//! | `try_pop`  | O(1) | Never blocks; `None` when empty            |
//! | `len`      | O(1) | Relaxed snapshot, may be stale             |
//!
//! ## Notes
//! - `len`, `is_empty` and `is_full` are hints, not synchronization.
//! - A slot is only written or read after the CAS on its counter claims it,
//!   so a second producer or consumer cannot cause a data race. It does break
//!   ordering guarantees and makes operations fail spuriously; use
//!   [`BoundedSpscQueue::split`] to keep exactly one of each.
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity lock-free ring for one producer thread and one consumer thread.
pub struct BoundedSpscQueue<T> {
    buffer: Box<[Slot<T>]>,
    capacity: usize,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: values move between threads through the queue, so `T: Send` is
// required. Shared access to a slot's `UnsafeCell` is serialized by the
// head/tail CAS plus the per-slot sequence handshake.
unsafe impl<T: Send> Send for BoundedSpscQueue<T> {}
unsafe impl<T: Send> Sync for BoundedSpscQueue<T> {}

impl<T> BoundedSpscQueue<T> {
    /// Creates a queue holding at least `requested` items.
    ///
    /// The realized capacity is the smallest power of two `>= requested`,
    /// with a minimum of 1.
    ///
    /// # Example
    ///
    /// ```
    /// use quantcore::ds::BoundedSpscQueue;
    ///
    /// assert_eq!(BoundedSpscQueue::<u32>::new(5).capacity(), 8);
    /// assert_eq!(BoundedSpscQueue::<u32>::new(0).capacity(), 1);
    /// ```
    pub fn new(requested: usize) -> Self {
        let capacity = requested.max(1).next_power_of_two();
        let buffer = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            capacity,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts to enqueue `value`.
    ///
    /// Returns `Err(value)` with no side effect if the queue is full or the
    /// next slot has not been released by the consumer yet.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity {
            return Err(value);
        }

        let slot = &self.buffer[head & self.mask];
        if slot.sequence.load(Ordering::Acquire) != head {
            return Err(value);
        }

        if !Self::claim(&self.head, head) {
            return Err(value);
        }

        // SAFETY: the CAS above made this thread the only writer of the slot,
        // and `sequence == head` means the consumer has finished with it.
        unsafe { (*slot.value.get()).write(value) };
        slot.sequence.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Attempts to dequeue the oldest value.
    ///
    /// Returns `None` if the queue is empty or the next slot has been claimed
    /// but not yet published by the producer.
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail >= head {
            return None;
        }

        let slot = &self.buffer[tail & self.mask];
        if slot.sequence.load(Ordering::Acquire) != tail.wrapping_add(1) {
            return None;
        }

        if !Self::claim(&self.tail, tail) {
            return None;
        }

        // SAFETY: `sequence == tail + 1` was published with Release after the
        // producer initialized the value; the CAS makes us its only reader.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.sequence
            .store(tail.wrapping_add(self.capacity), Ordering::Release);
        Some(value)
    }

    /// Returns a snapshot of the number of queued items.
    pub fn len(&self) -> usize {
        // Tail first: head only grows, so head >= the tail we saw.
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        head.wrapping_sub(tail).min(self.capacity)
    }

    /// Returns `true` if the queue looked empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue looked full at the time of the call.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Splits the queue into its producer and consumer endpoints.
    ///
    /// Neither endpoint is `Clone`, so each side can be owned by exactly one
    /// thread.
    ///
    /// # Example
    ///
    /// ```
    /// use quantcore::ds::BoundedSpscQueue;
    ///
    /// let (tx, rx) = BoundedSpscQueue::new(4).split();
    /// let producer = std::thread::spawn(move || {
    ///     for i in 0..100u32 {
    ///         let mut item = i;
    ///         while let Err(back) = tx.try_push(item) {
    ///             item = back;
    ///             std::thread::yield_now();
    ///         }
    ///     }
    /// });
    /// let mut received = Vec::new();
    /// while received.len() < 100 {
    ///     match rx.try_pop() {
    ///         Some(v) => received.push(v),
    ///         None => std::thread::yield_now(),
    ///     }
    /// }
    /// producer.join().unwrap();
    /// assert_eq!(received, (0..100).collect::<Vec<_>>());
    /// ```
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let queue = Arc::new(self);
        (
            Producer {
                queue: Arc::clone(&queue),
            },
            Consumer { queue },
        )
    }

    /// Advances `counter` from `expected` to `expected + 1`.
    ///
    /// Spurious weak-CAS failures are retried; a real change of the counter
    /// means another thread claimed the slot.
    #[inline]
    fn claim(counter: &AtomicUsize, expected: usize) -> bool {
        loop {
            match counter.compare_exchange_weak(
                expected,
                expected.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) if current == expected => continue,
                Err(_) => return false,
            }
        }
    }

    #[cfg(any(test, debug_assertions))]
    /// Checks slot sequences against head/tail; only meaningful while quiescent.
    pub fn debug_validate_invariants(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        assert!(head >= tail);
        assert!(head - tail <= self.capacity);
        for i in tail..head {
            let seq = self.buffer[i & self.mask].sequence.load(Ordering::Acquire);
            assert_eq!(seq, i + 1, "occupied slot {} has sequence {}", i, seq);
        }
    }
}

impl<T> Drop for BoundedSpscQueue<T> {
    fn drop(&mut self) {
        let tail = *self.tail.get_mut();
        let head = *self.head.get_mut();
        for i in tail..head {
            let slot = &mut self.buffer[i & self.mask];
            if *slot.sequence.get_mut() == i.wrapping_add(1) {
                // SAFETY: the slot was published and never consumed.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

impl<T> fmt::Debug for BoundedSpscQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSpscQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Producer endpoint of a split [`BoundedSpscQueue`].
#[derive(Debug)]
pub struct Producer<T> {
    queue: Arc<BoundedSpscQueue<T>>,
}

impl<T> Producer<T> {
    /// See [`BoundedSpscQueue::try_push`].
    #[inline]
    pub fn try_push(&self, value: T) -> Result<(), T> {
        self.queue.try_push(value)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Consumer endpoint of a split [`BoundedSpscQueue`].
#[derive(Debug)]
pub struct Consumer<T> {
    queue: Arc<BoundedSpscQueue<T>>,
}

impl<T> Consumer<T> {
    /// See [`BoundedSpscQueue::try_pop`].
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.queue.try_pop()
    }

    /// Pops up to `max` items into `out`, returning how many were moved.
    pub fn drain_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.queue.try_pop() {
                Some(value) => {
                    out.push(value);
                    moved += 1;
                },
                None => break,
            }
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
