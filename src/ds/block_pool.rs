//! Fixed-size block pool with an index-based free list.
//!
//! Blocks live in chunks of pointer-aligned words that are never returned to
//! the host allocator while the pool is alive. Free blocks are threaded
//! through a `links` array by block id, so the free list stores "next free
//! id" instead of raw pointers and callers only ever see opaque
//! [`BlockHandle`]s.
//!
//! ## Architecture
//!
//! ```text
//!   chunks                              links (per block id)
//!   ┌──────────────────────────────┐    ┌────┬───────────┐
//!   │ chunk 0: ids 0..5            │    │ id │ next      │
//!   │  [b0][b1][b2][b3][b4]        │    ├────┼───────────┤
//!   ├──────────────────────────────┤    │ 0  │ ALLOCATED │
//!   │ chunk 1: ids 5..7 (growth)   │    │ 1  │ 3         │ ◄── free_head
//!   │  [b5][b6]                    │    │ 3  │ 6         │
//!   └──────────────────────────────┘    │ 6  │ NIL       │
//!                                       └────┴───────────┘
//! ```
//!
//! ## Growth
//!
//! `allocate` on an empty free list adds a chunk of `max(1, total / 2)`
//! blocks. `reserve(n)` adds a chunk of exactly `n` blocks up front, for
//! latency-sensitive sections.
//!
//! ## Performance
//! - `allocate` / `deallocate`: O(1) under the pool mutex (O(n) on growth)
//! - `free_blocks`: O(free), walks the list
//! - `allocated_blocks`: lock-free atomic read
//!
//! ## Invalid handles
//!
//! A handle from another pool, an out-of-range id, or a block that is
//! already free is ignored: `deallocate` returns `false` and nothing changes.
//! Each block id carries a generation that is bumped on every free, so a
//! stale handle to a recycled id is rejected as well.
//!
//! ## Block access
//!
//! Caller code never runs under the pool mutex. `read` and `write` copy under
//! the lock; `with_block` hands the closure a private copy and writes it back
//! afterwards, so the closure may call back into the pool.
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::PoolError;

const WORD: usize = mem::size_of::<usize>();
const NIL: usize = usize::MAX;
const ALLOCATED: usize = usize::MAX - 1;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Opaque reference to a block handed out by [`BlockPool::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pool: u32,
    id: usize,
    generation: u32,
}

impl BlockHandle {
    /// Pool-wide block index; stable for the lifetime of the pool.
    pub fn index(self) -> usize {
        self.id
    }
}

struct Chunk {
    words: Box<[usize]>,
    first_id: usize,
}

struct PoolState {
    chunks: Vec<Chunk>,
    links: Vec<usize>,
    generations: Vec<u32>,
    free_head: usize,
}

impl PoolState {
    fn total_blocks(&self) -> usize {
        self.links.len()
    }

    fn is_live(&self, handle: BlockHandle) -> bool {
        self.links.get(handle.id).copied() == Some(ALLOCATED)
            && self.generations[handle.id] == handle.generation
    }

    fn block_bytes_mut(&mut self, id: usize, words_per_block: usize) -> &mut [u8] {
        let chunk_idx = self.chunks.partition_point(|c| c.first_id <= id) - 1;
        let chunk = &mut self.chunks[chunk_idx];
        let start = (id - chunk.first_id) * words_per_block;
        let words = &mut chunk.words[start..start + words_per_block];
        // SAFETY: `u8` has no invalid bit patterns and alignment 1; the byte
        // view covers exactly the initialized words it borrows mutably.
        unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * WORD) }
    }
}

/// Thread-safe pool of fixed-size blocks that only grows.
pub struct BlockPool {
    pool_id: u32,
    requested_block_size: usize,
    block_size: usize,
    state: Mutex<PoolState>,
    allocated: AtomicUsize,
}

impl BlockPool {
    /// Creates a pool of `initial_blocks` blocks, each able to hold
    /// `block_size` bytes.
    ///
    /// The stored stride is `block_size` padded to at least one pointer and to
    /// pointer alignment.
    ///
    /// # Example
    ///
    /// ```
    /// use quantcore::ds::BlockPool;
    ///
    /// let pool = BlockPool::new(4, 5).unwrap();
    /// assert_eq!(pool.total_blocks(), 5);
    /// assert_eq!(pool.free_blocks(), 5);
    /// assert_eq!(pool.allocated_blocks(), 0);
    /// ```
    pub fn new(block_size: usize, initial_blocks: usize) -> Result<Self, PoolError> {
        if block_size == 0 {
            return Err(PoolError::InvalidBlockSize);
        }
        let stride = block_size.max(WORD).div_ceil(WORD) * WORD;
        let pool = Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            requested_block_size: block_size,
            block_size: stride,
            state: Mutex::new(PoolState {
                chunks: Vec::new(),
                links: Vec::new(),
                generations: Vec::new(),
                free_head: NIL,
            }),
            allocated: AtomicUsize::new(0),
        };
        pool.reserve(initial_blocks);
        Ok(pool)
    }

    /// Stride of each block in bytes (after padding).
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Block size requested at construction.
    pub fn requested_block_size(&self) -> usize {
        self.requested_block_size
    }

    /// Takes a block off the free list, growing the pool if it is empty.
    pub fn allocate(&self) -> BlockHandle {
        let mut state = self.state.lock();
        if state.free_head == NIL {
            let grow_by = (state.total_blocks() / 2).max(1);
            self.expand(&mut state, grow_by);
        }
        let id = state.free_head;
        state.free_head = state.links[id];
        state.links[id] = ALLOCATED;
        self.allocated.fetch_add(1, Ordering::AcqRel);
        BlockHandle {
            pool: self.pool_id,
            id,
            generation: state.generations[id],
        }
    }

    /// Allocates a block that is returned to the pool when the guard drops.
    pub fn allocate_scoped(&self) -> PooledBlock<'_> {
        PooledBlock {
            pool: self,
            handle: Some(self.allocate()),
        }
    }

    /// Returns a block to the free list.
    ///
    /// Handles that were not produced by this pool, that are already free, or
    /// whose block has since been recycled are ignored and `false` is returned.
    pub fn deallocate(&self, handle: BlockHandle) -> bool {
        if handle.pool != self.pool_id {
            tracing::debug!(
                target: "quantcore::block_pool",
                handle_pool = handle.pool,
                pool = self.pool_id,
                "ignoring block from another pool"
            );
            return false;
        }
        let mut state = self.state.lock();
        if !state.is_live(handle) {
            tracing::debug!(
                target: "quantcore::block_pool",
                block = handle.id,
                generation = handle.generation,
                total = state.total_blocks(),
                "ignoring deallocate of block that is not allocated"
            );
            return false;
        }
        state.generations[handle.id] = state.generations[handle.id].wrapping_add(1);
        state.links[handle.id] = state.free_head;
        state.free_head = handle.id;
        self.allocated.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Grows the pool by `num_blocks` blocks.
    pub fn reserve(&self, num_blocks: usize) {
        if num_blocks == 0 {
            return;
        }
        let mut state = self.state.lock();
        self.expand(&mut state, num_blocks);
    }

    /// Runs `f` over a copy of the block's usable bytes and writes the copy
    /// back.
    ///
    /// The pool is not locked while `f` runs, so `f` may allocate, free or
    /// inspect the same pool. Returns `None` if the handle is dead before `f`
    /// runs; if it dies while `f` runs, the result is still returned and the
    /// write-back is dropped.
    pub fn with_block<R>(&self, handle: BlockHandle, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut scratch = self.read(handle)?;
        let result = f(&mut scratch);
        if self.write(handle, &scratch).is_none() {
            tracing::debug!(
                target: "quantcore::block_pool",
                block = handle.id,
                "block released during with_block; write-back dropped"
            );
        }
        Some(result)
    }

    /// Copies `bytes` into the start of a block. Returns the number of bytes
    /// written, truncated to the block size, or `None` for a dead handle.
    pub fn write(&self, handle: BlockHandle, bytes: &[u8]) -> Option<usize> {
        self.locked_bytes(handle, |block| {
            let n = bytes.len().min(block.len());
            block[..n].copy_from_slice(&bytes[..n]);
            n
        })
    }

    /// Copies the contents of a block out.
    pub fn read(&self, handle: BlockHandle) -> Option<Vec<u8>> {
        self.locked_bytes(handle, |block| block.to_vec())
    }

    // Only for the fixed copy routines above; never pass caller code here.
    fn locked_bytes<R>(&self, handle: BlockHandle, copy: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if handle.pool != self.pool_id {
            return None;
        }
        let mut state = self.state.lock();
        if !state.is_live(handle) {
            return None;
        }
        let bytes = state.block_bytes_mut(handle.id, self.block_size / WORD);
        Some(copy(&mut bytes[..self.requested_block_size]))
    }

    /// Total blocks owned by the pool (allocated plus free).
    pub fn total_blocks(&self) -> usize {
        self.state.lock().total_blocks()
    }

    /// Number of blocks on the free list; walks the list.
    pub fn free_blocks(&self) -> usize {
        let state = self.state.lock();
        let mut count = 0;
        let mut current = state.free_head;
        while current != NIL {
            count += 1;
            current = state.links[current];
        }
        count
    }

    /// Number of blocks currently handed out. Lock-free.
    pub fn allocated_blocks(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    fn expand(&self, state: &mut PoolState, num_blocks: usize) {
        let first_id = state.total_blocks();
        let words_per_block = self.block_size / WORD;
        state.chunks.push(Chunk {
            words: vec![0usize; num_blocks * words_per_block].into_boxed_slice(),
            first_id,
        });

        let old_head = state.free_head;
        state
            .links
            .extend((first_id + 1..first_id + num_blocks).chain(std::iter::once(old_head)));
        state.generations.resize(first_id + num_blocks, 0);
        state.free_head = first_id;

        tracing::debug!(
            target: "quantcore::block_pool",
            added = num_blocks,
            total = state.total_blocks(),
            chunks = state.chunks.len(),
            block_size = self.block_size,
            "block pool expanded"
        );
    }

    #[cfg(any(test, debug_assertions))]
    /// Validates free-list and counter invariants.
    pub fn debug_validate_invariants(&self) {
        let state = self.state.lock();
        let mut seen = vec![false; state.total_blocks()];
        let mut current = state.free_head;
        let mut free = 0;
        while current != NIL {
            assert!(current < state.total_blocks(), "free list id out of range");
            assert!(!seen[current], "cycle in free list at {}", current);
            seen[current] = true;
            free += 1;
            current = state.links[current];
        }
        let allocated = state.links.iter().filter(|&&l| l == ALLOCATED).count();
        assert_eq!(free + allocated, state.total_blocks());
        assert_eq!(state.generations.len(), state.total_blocks());
        assert_eq!(allocated, self.allocated.load(Ordering::Acquire));
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("total_blocks", &state.total_blocks())
            .field("chunks", &state.chunks.len())
            .field("allocated_blocks", &self.allocated_blocks())
            .finish()
    }
}

/// RAII guard for a pool block; deallocates on drop.
#[derive(Debug)]
pub struct PooledBlock<'a> {
    pool: &'a BlockPool,
    handle: Option<BlockHandle>,
}

impl PooledBlock<'_> {
    pub fn handle(&self) -> BlockHandle {
        self.handle.expect("pooled block already released")
    }

    /// Runs `f` over the block's bytes; see [`BlockPool::with_block`].
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.pool
            .with_block(self.handle(), f)
            .expect("pooled block handle is always allocated")
    }

    /// Releases ownership without returning the block to the pool.
    pub fn into_handle(mut self) -> BlockHandle {
        self.handle.take().expect("pooled block already released")
    }
}

impl Drop for PooledBlock<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.deallocate(handle);
        }
    }
}
