//! Bump allocator backing the memtable and its skip list.
//!
//! Memory is carved out of 4 KiB blocks; an allocation larger than a
//! quarter block gets a block of its own so the current block's remainder
//! stays usable for small requests. Nothing is ever freed individually:
//! dropping the arena releases everything at once.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

const BLOCK_SIZE: usize = 4096;

pub struct Arena {
    inner: UnsafeCell<Inner>,
    /// Total bytes allocated from the system, including block overhead.
    memory_usage: AtomicUsize,
}

struct Inner {
    /// Remaining capacity of the current block.
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,
    blocks: Vec<Box<[u8]>>,
}

// The arena is mutated only by the single memtable writer; readers only
// dereference previously returned pointers, which stay stable because
// blocks are never reallocated or freed before the arena drops.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Self {
        Arena {
            inner: UnsafeCell::new(Inner {
                alloc_ptr: std::ptr::null_mut(),
                alloc_bytes_remaining: 0,
                blocks: Vec::new(),
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Returns a pointer to `bytes` bytes of uninitialized memory.
    ///
    /// # Safety contract
    ///
    /// Must only be called from the single writer thread. `bytes` must be
    /// nonzero.
    pub fn allocate(&self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        let inner = unsafe { &mut *self.inner.get() };
        if bytes <= inner.alloc_bytes_remaining {
            let result = inner.alloc_ptr;
            inner.alloc_ptr = unsafe { inner.alloc_ptr.add(bytes) };
            inner.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(inner, bytes)
    }

    /// Like `allocate`, but the returned pointer is aligned to the pointer
    /// width (at least 8 bytes).
    pub fn allocate_aligned(&self, bytes: usize) -> *mut u8 {
        let align = std::mem::align_of::<*mut u8>().max(8);
        let inner = unsafe { &mut *self.inner.get() };
        let current = inner.alloc_ptr as usize;
        let slop = (align - (current & (align - 1))) & (align - 1);
        let needed = bytes + slop;
        if needed <= inner.alloc_bytes_remaining {
            let result = unsafe { inner.alloc_ptr.add(slop) };
            inner.alloc_ptr = unsafe { inner.alloc_ptr.add(needed) };
            inner.alloc_bytes_remaining -= needed;
            return result;
        }
        // Fallback blocks come straight from the system allocator and are
        // already max-aligned.
        self.allocate_fallback(inner, bytes)
    }

    fn allocate_fallback(&self, inner: &mut Inner, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // Large request: dedicated block, current block keeps its tail.
            return self.new_block(inner, bytes);
        }
        let ptr = self.new_block(inner, BLOCK_SIZE);
        inner.alloc_ptr = unsafe { ptr.add(bytes) };
        inner.alloc_bytes_remaining = BLOCK_SIZE - bytes;
        ptr
    }

    fn new_block(&self, inner: &mut Inner, block_bytes: usize) -> *mut u8 {
        let mut block = vec![0u8; block_bytes].into_boxed_slice();
        let ptr = block.as_mut_ptr();
        inner.blocks.push(block);
        self.memory_usage.fetch_add(
            block_bytes + std::mem::size_of::<Box<[u8]>>(),
            Ordering::Relaxed,
        );
        ptr
    }

    /// Total bytes held by the arena, including per-block bookkeeping.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let arena = Arena::new();
        assert_eq!(arena.memory_usage(), 0);
    }

    #[test]
    fn test_small_allocations_share_blocks() {
        let arena = Arena::new();
        for _ in 0..100 {
            let p = arena.allocate(8);
            unsafe { std::ptr::write_bytes(p, 0xaa, 8) };
        }
        // 100 * 8 = 800 bytes fit in a single 4 KiB block.
        assert!(arena.memory_usage() < 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_large_allocation_gets_own_block() {
        let arena = Arena::new();
        let small = arena.allocate(16);
        let usage_before = arena.memory_usage();
        let large = arena.allocate(BLOCK_SIZE);
        assert!(arena.memory_usage() >= usage_before + BLOCK_SIZE);
        // The small-allocation block keeps serving after the large one.
        let next_small = arena.allocate(16);
        assert_eq!(next_small as usize, small as usize + 16);
        unsafe { std::ptr::write_bytes(large, 0xbb, BLOCK_SIZE) };
    }

    #[test]
    fn test_aligned() {
        let arena = Arena::new();
        arena.allocate(1);
        for _ in 0..50 {
            let p = arena.allocate_aligned(24);
            assert_eq!(p as usize % 8, 0);
            arena.allocate(3);
        }
    }

    #[test]
    fn test_writes_survive_growth() {
        let arena = Arena::new();
        let mut allocations = Vec::new();
        for i in 0..2000usize {
            let len = 1 + (i * 7) % 200;
            let p = arena.allocate(len);
            unsafe { std::ptr::write_bytes(p, (i % 251) as u8, len) };
            allocations.push((p, len, (i % 251) as u8));
        }
        for (p, len, fill) in allocations {
            let slice = unsafe { std::slice::from_raw_parts(p, len) };
            assert!(slice.iter().all(|&b| b == fill));
        }
    }
}
