//! Probabilistic ordered set over an arena.
//!
//! The memtable's backing structure. One writer inserts; any number of
//! readers traverse concurrently without locks. The contract rests on two
//! rules:
//!
//! - a node's forward pointers are filled in (relaxed) before any
//!   predecessor is switched to point at it with a release store;
//! - readers load forward pointers with acquire, so a reachable node is
//!   always fully initialized.
//!
//! Nodes and key bytes live in the arena and are never freed or moved
//! until the whole list drops, so readers can hold plain pointers across
//! an insert. Keys must be unique; callers guarantee this (internal keys
//! carry a sequence number).

use std::cmp::Ordering;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::util::arena::Arena;

pub const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

/// Ordering over raw byte keys. The memtable supplies a comparator that
/// length-decodes its entries before delegating to the internal-key order.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

#[repr(C)]
struct Node {
    key_ptr: *const u8,
    key_len: usize,
    // Full tower on every node; unused levels stay null.
    next: [AtomicPtr<Node>; MAX_HEIGHT],
}

impl Node {
    fn key(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.key_ptr, self.key_len) }
    }

    fn next(&self, level: usize) -> *mut Node {
        self.next[level].load(AtomicOrdering::Acquire)
    }

    fn set_next(&self, level: usize, node: *mut Node) {
        self.next[level].store(node, AtomicOrdering::Release);
    }

    fn next_relaxed(&self, level: usize) -> *mut Node {
        self.next[level].load(AtomicOrdering::Relaxed)
    }

    fn set_next_relaxed(&self, level: usize, node: *mut Node) {
        self.next[level].store(node, AtomicOrdering::Relaxed);
    }
}

pub struct SkipList<C: KeyComparator> {
    arena: Arc<Arena>,
    cmp: C,
    head: *mut Node,
    max_height: AtomicUsize,
    rng: Mutex<StdRng>,
}

unsafe impl<C: KeyComparator> Send for SkipList<C> {}
unsafe impl<C: KeyComparator> Sync for SkipList<C> {}

impl<C: KeyComparator> SkipList<C> {
    pub fn new(cmp: C, arena: Arc<Arena>) -> Self {
        let head = Self::alloc_node(&arena, &[]);
        SkipList {
            arena,
            cmp,
            head,
            max_height: AtomicUsize::new(1),
            rng: Mutex::new(StdRng::seed_from_u64(0xc1d8_5eed)),
        }
    }

    fn alloc_node(arena: &Arena, key: &[u8]) -> *mut Node {
        let node = arena.allocate_aligned(std::mem::size_of::<Node>()) as *mut Node;
        let key_ptr = if key.is_empty() {
            std::ptr::null()
        } else {
            let dst = arena.allocate(key.len());
            unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), dst, key.len()) };
            dst as *const u8
        };
        unsafe {
            std::ptr::write(
                node,
                Node {
                    key_ptr,
                    key_len: key.len(),
                    next: Default::default(),
                },
            );
        }
        node
    }

    fn random_height(&self) -> usize {
        let mut rng = self.rng.lock().unwrap();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }

    fn current_height(&self) -> usize {
        self.max_height.load(AtomicOrdering::Relaxed)
    }

    fn key_is_after_node(&self, key: &[u8], node: *mut Node) -> bool {
        !node.is_null() && self.cmp.compare(unsafe { (*node).key() }, key) == Ordering::Less
    }

    /// First node whose key is >= `key`; fills `prev` with the predecessor
    /// at every level when provided.
    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut node = self.head;
        let mut level = self.current_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if self.key_is_after_node(key, next) {
                node = next;
            } else {
                if let Some(prev) = prev.as_mut() {
                    prev[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Last node whose key is < `key`, or the head if none.
    fn find_less_than(&self, key: &[u8]) -> *mut Node {
        let mut node = self.head;
        let mut level = self.current_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if self.key_is_after_node(key, next) {
                node = next;
            } else if level == 0 {
                return node;
            } else {
                level -= 1;
            }
        }
    }

    /// Last node in the list, or the head if empty.
    fn find_last(&self) -> *mut Node {
        let mut node = self.head;
        let mut level = self.current_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if !next.is_null() {
                node = next;
            } else if level == 0 {
                return node;
            } else {
                level -= 1;
            }
        }
    }

    /// Inserts `key`, copying it into the arena.
    ///
    /// Single-writer: callers must serialize inserts externally (the engine
    /// mutex does). Readers may run concurrently. `key` must not compare
    /// equal to any inserted key.
    pub fn insert(&self, key: &[u8]) {
        let mut prev = [std::ptr::null_mut(); MAX_HEIGHT];
        let node = self.find_greater_or_equal(key, Some(&mut prev));
        debug_assert!(
            node.is_null() || self.cmp.compare(unsafe { (*node).key() }, key) != Ordering::Equal,
            "duplicate key inserted"
        );

        let height = self.random_height();
        if height > self.current_height() {
            for p in prev.iter_mut().take(height).skip(self.current_height()) {
                *p = self.head;
            }
            // Readers that see the stale height just skip the new levels;
            // readers that see the new height find valid (possibly null)
            // pointers in head.
            self.max_height.store(height, AtomicOrdering::Relaxed);
        }

        let new_node = Self::alloc_node(&self.arena, key);
        for level in 0..height {
            unsafe {
                // The new node is unreachable until prev is switched, so
                // its own pointers need no ordering.
                (*new_node).set_next_relaxed(level, (*prev[level]).next_relaxed(level));
                (*prev[level]).set_next(level, new_node);
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null() && self.cmp.compare(unsafe { (*node).key() }, key) == Ordering::Equal
    }
}

/// Bidirectional cursor over the list. Invalid until positioned with one
/// of the seek calls. Holds the list alive; node pointers stay valid
/// because the arena never frees.
pub struct SkipListIter<C: KeyComparator> {
    list: Arc<SkipList<C>>,
    node: *mut Node,
}

unsafe impl<C: KeyComparator> Send for SkipListIter<C> {}

impl<C: KeyComparator> SkipListIter<C> {
    pub fn new(list: Arc<SkipList<C>>) -> Self {
        SkipListIter {
            list,
            node: std::ptr::null_mut(),
        }
    }

    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        unsafe { (*self.node).key() }
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { (*self.list.head).next(0) };
    }

    pub fn seek_to_last(&mut self) {
        let node = self.list.find_last();
        self.node = if node == self.list.head {
            std::ptr::null_mut()
        } else {
            node
        };
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    pub fn prev(&mut self) {
        // No back links: retreat by searching for the last node before the
        // current key.
        debug_assert!(self.valid());
        let node = self.list.find_less_than(unsafe { (*self.node).key() });
        self.node = if node == self.list.head {
            std::ptr::null_mut()
        } else {
            node
        };
    }
}
