//! Atomic write batches.
//!
//! A batch is a mutable buffer whose wire form is exactly what gets
//! appended to the write-ahead log — the batch *is* the log record:
//!
//! ```text
//! +--------------+------------+---------------------------------+
//! | seq: fixed64 | count: u32 | entries...                      |
//! +--------------+------------+---------------------------------+
//! entry := 0x01 ‖ varint-len key ‖ varint-len value   (put)
//!        | 0x00 ‖ varint-len key                      (delete)
//! ```
//!
//! The header's count must equal the number of entries the stream
//! produces on replay; a mismatch is corruption.

use crate::dbformat::{SequenceNumber, ValueType};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::util::coding::{
    decode_fixed32, decode_fixed64, encode_fixed32, encode_fixed64,
    get_length_prefixed_slice, put_length_prefixed_slice,
};

/// `seq(8) ‖ count(4)`.
pub const BATCH_HEADER_SIZE: usize = 12;

/// Receives the entries of a batch in insertion order.
pub trait BatchHandler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0; BATCH_HEADER_SIZE],
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Appends all of `other`'s entries to this batch.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Size of the wire representation, header included.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    fn set_count(&mut self, count: u32) {
        encode_fixed32(&mut self.rep[8..12], count);
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[..8])
    }

    pub(crate) fn set_sequence(&mut self, seq: SequenceNumber) {
        encode_fixed64(&mut self.rep[..8], seq);
    }

    /// The log-record bytes.
    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Adopts `data` as the batch representation, e.g. a replayed log
    /// record.
    pub(crate) fn set_contents(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("batch record too small".to_string()));
        }
        self.rep.clear();
        self.rep.extend_from_slice(data);
        Ok(())
    }

    /// Walks the entries in order, invoking the handler for each.
    pub fn iterate<H: BatchHandler>(&self, handler: &mut H) -> Result<()> {
        if self.rep.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("batch record too small".to_string()));
        }
        let mut input = &self.rep[BATCH_HEADER_SIZE..];
        let mut found = 0u32;
        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];
            match tag {
                t if t == ValueType::Value as u8 => {
                    let (key, n) = get_length_prefixed_slice(input)?;
                    let (value, m) = get_length_prefixed_slice(&input[n..])?;
                    handler.put(key, value);
                    input = &input[n + m..];
                }
                t if t == ValueType::Deletion as u8 => {
                    let (key, n) = get_length_prefixed_slice(input)?;
                    handler.delete(key);
                    input = &input[n..];
                }
                other => {
                    return Err(Error::Corruption(format!(
                        "unknown batch entry tag {other:#x}"
                    )));
                }
            }
            found += 1;
        }
        if found != self.count() {
            return Err(Error::Corruption("batch has wrong count".to_string()));
        }
        Ok(())
    }

    /// Applies the batch to a memtable, assigning consecutive sequence
    /// numbers starting at the batch's base sequence.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}
