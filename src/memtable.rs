//! In-memory sorted buffer for recent writes.
//!
//! A skip list of encoded entries over an arena. Each entry is laid out
//! contiguously:
//!
//! ```text
//! varint32(klen + 8) ‖ user_key ‖ tag(8) ‖ varint32(vlen) ‖ value
//! ```
//!
//! The skip list key is the whole entry; its comparator strips the length
//! prefix and orders by internal key, so a seek to
//! `user_key ‖ (seq << 8 | kValueTypeForSeek)` lands on the newest entry
//! for that user key with sequence <= seq.
//!
//! Ownership is shared: the engine holds one `Arc` for the mutable
//! memtable and takes another for the flush duration; readers clone an
//! `Arc` for the span of a lookup. Mutation stays single-writer under the
//! engine mutex while readers run lock-free against the skip list.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::dbformat::{
    pack_sequence_and_type, InternalKeyComparator, LookupKey, SequenceNumber, ValueType,
};
use crate::error::{Error, Result};
use crate::iterator::Cursor;
use crate::skiplist::{KeyComparator, SkipList, SkipListIter};
use crate::util::arena::Arena;
use crate::util::coding::{
    get_length_prefixed_slice, put_fixed64, put_varint32, varint_length,
};

/// Orders length-prefixed memtable entries by their internal key.
#[derive(Clone)]
pub struct MemtableKeyComparator {
    icmp: InternalKeyComparator,
}

impl KeyComparator for MemtableKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (akey, _) = get_length_prefixed_slice(a).expect("corrupt memtable entry");
        let (bkey, _) = get_length_prefixed_slice(b).expect("corrupt memtable entry");
        self.icmp.compare(akey, bkey)
    }
}

pub struct MemTable {
    cmp: InternalKeyComparator,
    arena: Arc<Arena>,
    table: Arc<SkipList<MemtableKeyComparator>>,
}

impl MemTable {
    pub fn new(cmp: InternalKeyComparator) -> Self {
        let arena = Arc::new(Arena::new());
        let table = Arc::new(SkipList::new(
            MemtableKeyComparator { icmp: cmp.clone() },
            Arc::clone(&arena),
        ));
        MemTable { cmp, arena, table }
    }

    /// Bytes held by the arena; drives the flush threshold.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Encodes and inserts one entry. Deletions store an empty value.
    pub fn add(&self, seq: SequenceNumber, t: ValueType, key: &[u8], value: &[u8]) {
        let internal_key_len = key.len() + 8;
        let mut buf = Vec::with_capacity(
            varint_length(internal_key_len as u64)
                + internal_key_len
                + varint_length(value.len() as u64)
                + value.len(),
        );
        put_varint32(&mut buf, internal_key_len as u32);
        buf.extend_from_slice(key);
        put_fixed64(&mut buf, pack_sequence_and_type(seq, t));
        put_varint32(&mut buf, value.len() as u32);
        buf.extend_from_slice(value);
        self.table.insert(&buf);
    }

    /// Point lookup at the snapshot baked into `key`.
    ///
    /// `None`: no entry for this user key here (fall through to the next
    /// layer). `Some(Ok(value))`: hit. `Some(Err(NotFound))`: tombstone —
    /// the key is deleted and deeper layers must not be consulted.
    pub fn get(&self, key: &LookupKey) -> Option<Result<Vec<u8>>> {
        let mut iter = SkipListIter::new(Arc::clone(&self.table));
        iter.seek(key.memtable_key());
        if !iter.valid() {
            return None;
        }
        let entry = iter.key();
        let (internal_key, consumed) =
            get_length_prefixed_slice(entry).expect("corrupt memtable entry");
        let user_key = &internal_key[..internal_key.len() - 8];
        if self
            .cmp
            .user_comparator()
            .compare(user_key, key.user_key())
            != Ordering::Equal
        {
            return None;
        }
        let tag = crate::util::coding::decode_fixed64(&internal_key[internal_key.len() - 8..]);
        match (tag & 0xff) as u8 {
            t if t == ValueType::Value as u8 => {
                let (value, _) = get_length_prefixed_slice(&entry[consumed..])
                    .expect("corrupt memtable entry");
                Some(Ok(value.to_vec()))
            }
            _ => Some(Err(Error::NotFound)),
        }
    }

    /// Cursor over the table yielding **internal keys**; merging happens at
    /// the internal-key level.
    pub fn cursor(&self) -> MemTableCursor {
        MemTableCursor {
            iter: SkipListIter::new(Arc::clone(&self.table)),
            scratch: Vec::new(),
        }
    }
}

pub struct MemTableCursor {
    iter: SkipListIter<MemtableKeyComparator>,
    scratch: Vec<u8>,
}

impl MemTableCursor {
    fn entry(&self) -> &[u8] {
        self.iter.key()
    }
}

impl Cursor for MemTableCursor {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
    }

    fn seek(&mut self, target: &[u8]) {
        // The skip list stores length-prefixed entries; wrap the internal
        // key target in the same framing.
        self.scratch.clear();
        put_varint32(&mut self.scratch, target.len() as u32);
        self.scratch.extend_from_slice(target);
        self.iter.seek(&self.scratch);
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn prev(&mut self) {
        self.iter.prev();
    }

    fn key(&self) -> &[u8] {
        let (internal_key, _) =
            get_length_prefixed_slice(self.entry()).expect("corrupt memtable entry");
        internal_key
    }

    fn value(&self) -> &[u8] {
        let entry = self.entry();
        let (_, consumed) = get_length_prefixed_slice(entry).expect("corrupt memtable entry");
        let (value, _) =
            get_length_prefixed_slice(&entry[consumed..]).expect("corrupt memtable entry");
        value
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
