//! Internal cursor abstraction and the k-way merge over it.
//!
//! Std's `Iterator` cannot express seekable, bidirectional traversal, so
//! every layer of the read path (memtable, blocks, tables, the merged
//! view) speaks [`Cursor`] instead. A cursor is invalid until positioned;
//! `valid() == false` means either exhaustion or error, and callers
//! disambiguate through `status()`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;

pub trait Cursor: Send {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    /// Current key; only callable while valid.
    fn key(&self) -> &[u8];
    /// Current value; only callable while valid.
    fn value(&self) -> &[u8];
    /// First error this cursor or any child encountered.
    fn status(&self) -> Result<()>;
}

/// A cursor that is always invalid, carrying a fixed status. Stands in for
/// a child that failed to construct.
pub struct EmptyCursor {
    status: Result<()>,
}

impl EmptyCursor {
    pub fn new(status: Result<()>) -> Self {
        EmptyCursor { status }
    }

    pub fn ok() -> Self {
        EmptyCursor { status: Ok(()) }
    }
}

impl Cursor for EmptyCursor {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        panic!("key() on invalid cursor")
    }
    fn value(&self) -> &[u8] {
        panic!("value() on invalid cursor")
    }
    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

/// Thin shell over a child cursor that caches `valid()` and the key bytes,
/// keeping the merge loop off the virtual calls.
struct CursorWrapper {
    inner: Box<dyn Cursor>,
    valid: bool,
    key: Vec<u8>,
}

impl CursorWrapper {
    fn new(inner: Box<dyn Cursor>) -> Self {
        CursorWrapper {
            inner,
            valid: false,
            key: Vec::new(),
        }
    }

    fn update(&mut self) {
        self.valid = self.inner.valid();
        if self.valid {
            self.key.clear();
            self.key.extend_from_slice(self.inner.key());
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target);
        self.update();
    }

    fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
        self.update();
    }

    fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
        self.update();
    }

    fn next(&mut self) {
        self.inner.next();
        self.update();
    }

    fn prev(&mut self) {
        self.inner.prev();
        self.update();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Merges N sorted children into one sorted stream. For equal keys the
/// child with the smaller index wins, which is what layers the memtable
/// over the tables: newer sources are registered first.
pub struct MergingCursor {
    cmp: Arc<dyn Comparator>,
    children: Vec<CursorWrapper>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingCursor {
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<Box<dyn Cursor>>) -> Self {
        MergingCursor {
            cmp,
            children: children.into_iter().map(CursorWrapper::new).collect(),
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid {
                continue;
            }
            match smallest {
                None => smallest = Some(i),
                Some(s) => {
                    if self.cmp.compare(&child.key, &self.children[s].key) == Ordering::Less {
                        smallest = Some(i);
                    }
                }
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.valid {
                continue;
            }
            match largest {
                None => largest = Some(i),
                Some(l) => {
                    if self.cmp.compare(&child.key, &self.children[l].key) == Ordering::Greater {
                        largest = Some(i);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl Cursor for MergingCursor {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Backward;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        let current = self.current.expect("next() on invalid cursor");

        // After a direction change the non-current children sit at
        // arbitrary positions; force each strictly ahead of the current
        // key before advancing.
        if self.direction != Direction::Forward {
            let key = self.children[current].key.clone();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid && self.cmp.compare(&key, &child.key) == Ordering::Equal {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let current = self.current.expect("prev() on invalid cursor");

        if self.direction != Direction::Backward {
            let key = self.children[current].key.clone();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                // Land strictly behind `key`: seek places the child at the
                // first entry >= key, so one step back does it; a child
                // whose entries are all < key retreats from the end.
                child.seek(&key);
                if child.valid {
                    child.prev();
                } else {
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Backward;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        let current = self.current.expect("key() on invalid cursor");
        &self.children[current].key
    }

    fn value(&self) -> &[u8] {
        let current = self.current.expect("value() on invalid cursor");
        self.children[current].inner.value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.inner.status()?;
        }
        Ok(())
    }
}
