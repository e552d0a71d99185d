//! Fixed-block memory arenas for request/response buffers.
//!
//! The original completion-port server hands each worker a private C-style
//! arena: a flat array of fixed-size blocks with a free list threaded through
//! unused blocks via raw pointers, so a fast-path `alloc`/`free` never touches
//! the global allocator. Safe Rust has no equivalent to "pointer into a buffer
//! I also own a `Box` of", so this keeps the shape of the original (N
//! independent arenas, a fast fixed-size path, a slow path for oversized
//! requests) but realizes the free list as a lock-free [`ArrayQueue`] of
//! owned blocks instead of an intrusive linked list.
//!
//! Concurrent workers each get an arena by round-robin over an atomic
//! counter, which spreads contention across arenas the same way the
//! original's per-worker-thread arena assignment did.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::limits::ArenaLimits;

/// A block handed out by [`ArenaPool::alloc`].
///
/// `Pooled` blocks return to their arena's free list on drop; `Large` blocks
/// (requests above `block_size`) fall back to a plain heap allocation that is
/// simply dropped.
pub(crate) enum Block {
    Pooled { arena_id: usize, buf: Option<Box<[u8]>> },
    Large(Box<[u8]>),
}

impl Block {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Block::Pooled { buf, .. } => buf.as_deref().expect("block taken before drop"),
            Block::Large(buf) => buf,
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Block::Pooled { buf, .. } => buf.as_deref_mut().expect("block taken before drop"),
            Block::Large(buf) => buf,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}

struct Arena {
    free: ArrayQueue<Box<[u8]>>,
    block_size: usize,
}

impl Arena {
    fn new(block_size: usize, initial_blocks: usize) -> Self {
        let free = ArrayQueue::new(initial_blocks.max(1));
        for _ in 0..initial_blocks {
            let _ = free.push(vec![0u8; block_size].into_boxed_slice());
        }
        Self { free, block_size }
    }
}

/// Statistics surfaced on the metrics endpoint. All counters are
/// monotonically increasing; derive rates by sampling twice.
#[derive(Default)]
pub(crate) struct ArenaStats {
    pub(crate) fast_path_allocs: AtomicU64,
    pub(crate) fast_path_frees: AtomicU64,
    pub(crate) large_allocs: AtomicU64,
    pub(crate) blocks_grown: AtomicU64,
}

/// A fixed set of fast-path memory arenas shared by every connection task.
pub(crate) struct ArenaPool {
    arenas: Vec<Arena>,
    next: AtomicUsize,
    stats: Arc<ArenaStats>,
}

impl ArenaPool {
    pub(crate) fn new(limits: &ArenaLimits) -> Self {
        let num_arenas = limits.num_arenas.max(1);
        let per_arena = (limits.initial_blocks / num_arenas).max(1);
        let arenas = (0..num_arenas)
            .map(|_| Arena::new(limits.block_size, per_arena))
            .collect();

        Self {
            arenas,
            next: AtomicUsize::new(0),
            stats: Arc::new(ArenaStats::default()),
        }
    }

    pub(crate) fn stats(&self) -> &ArenaStats {
        &self.stats
    }

    /// Returns a block of at least `size` bytes. Requests that fit within a
    /// single arena block are served from that arena's free list (growing it
    /// with a fresh heap block if the list is momentarily empty); larger
    /// requests bypass the pool entirely.
    pub(crate) fn alloc(&self, size: usize) -> Block {
        let arena_id = self.next.fetch_add(1, Ordering::Relaxed) % self.arenas.len();
        let arena = &self.arenas[arena_id];

        if size > arena.block_size {
            self.stats.large_allocs.fetch_add(1, Ordering::Relaxed);
            return Block::Large(vec![0u8; size].into_boxed_slice());
        }

        let buf = arena.free.pop().unwrap_or_else(|| {
            self.stats.blocks_grown.fetch_add(1, Ordering::Relaxed);
            vec![0u8; arena.block_size].into_boxed_slice()
        });

        self.stats.fast_path_allocs.fetch_add(1, Ordering::Relaxed);
        Block::Pooled {
            arena_id,
            buf: Some(buf),
        }
    }

    /// Returns `block` to its originating arena's free list. Called from
    /// `Block`'s drop glue is not possible without a back-reference to the
    /// pool, so callers that want reuse (rather than simply dropping the
    /// block) must call this explicitly before the block goes out of scope.
    pub(crate) fn free(&self, mut block: Block) {
        if let Block::Pooled { arena_id, buf } = &mut block {
            if let Some(buf) = buf.take() {
                let _ = self.arenas[*arena_id].free.push(buf);
                self.stats.fast_path_frees.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ArenaLimits {
        ArenaLimits {
            num_arenas: 2,
            block_size: 64,
            initial_blocks: 4,
            _priv: (),
        }
    }

    #[test]
    fn fast_path_round_trips() {
        let pool = ArenaPool::new(&limits());
        let block = pool.alloc(32);
        assert_eq!(block.len(), 64);
        assert!(matches!(block, Block::Pooled { .. }));
        pool.free(block);
        assert_eq!(pool.stats().fast_path_allocs.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().fast_path_frees.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn oversized_request_falls_back_to_large() {
        let pool = ArenaPool::new(&limits());
        let block = pool.alloc(4096);
        assert_eq!(block.len(), 4096);
        assert!(matches!(block, Block::Large(_)));
        assert_eq!(pool.stats().large_allocs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn free_list_exhaustion_grows_arena() {
        let pool = ArenaPool::new(&limits());
        // initial_blocks=4 split across 2 arenas => 2 blocks per arena; the
        // round-robin counter always lands every other alloc on the same
        // arena, so after 2 allocs on one arena without freeing it must grow.
        let mut blocks = Vec::new();
        for _ in 0..6 {
            blocks.push(pool.alloc(10));
        }
        assert!(pool.stats().blocks_grown.load(Ordering::Relaxed) > 0);
    }
}
