//! Prefix-compressed block and its cursor.
//!
//! A block payload is a run of entries followed by a restart array:
//!
//! ```text
//! entry := varint(shared) ‖ varint(non_shared) ‖ varint(vlen)
//!          ‖ key_delta(non_shared) ‖ value(vlen)
//! block := entry* ‖ restart_offset: u32 × n ‖ num_restarts: u32
//! ```
//!
//! At a restart point `shared == 0`, so a cursor can start decoding from
//! any restart offset; seeks binary-search the restart array and scan
//! linearly from there.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::Cursor;
use crate::util::coding::{decode_fixed32, get_varint32};

pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too small for restart count".to_string()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = (data.len() as u64 - 4) / 4;
        if num_restarts as u64 > max_restarts {
            return Err(Error::Corruption("bad restart count in block".to_string()));
        }
        let restart_offset = data.len() - 4 - num_restarts as usize * 4;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        decode_fixed32(&self.data[self.restart_offset + index as usize * 4..]) as usize
    }
}

/// Cursor over one block. `current == restart_offset` means invalid.
pub struct BlockCursor {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    /// Offset of the current entry within the payload.
    current: usize,
    /// Restart block containing `current`.
    restart_index: u32,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Result<()>,
}

/// Decoded entry header: (shared, non_shared, value_len, header_len).
fn decode_entry_header(data: &[u8]) -> Result<(usize, usize, usize, usize)> {
    let (shared, a) = get_varint32(data)?;
    let (non_shared, b) = get_varint32(&data[a..])?;
    let (value_len, c) = get_varint32(&data[a + b..])?;
    Ok((
        shared as usize,
        non_shared as usize,
        value_len as usize,
        a + b + c,
    ))
}

impl BlockCursor {
    pub fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> Self {
        let current = block.restart_offset;
        let restart_index = block.num_restarts;
        BlockCursor {
            block,
            cmp,
            current,
            restart_index,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: Ok(()),
        }
    }

    fn corrupt(&mut self) {
        self.status = Err(crate::errcorrupt!("bad entry in block"));
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_len = 0;
    }

    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        let offset = self.block.restart_point(index);
        self.current = offset;
        self.value_offset = offset;
        self.value_len = 0;
    }

    /// Decodes the entry at `next_entry_offset`, extending the cached key.
    /// Returns false at the end of the payload or on corruption.
    fn parse_next_entry(&mut self) -> bool {
        let offset = self.next_entry_offset();
        if offset >= self.block.restart_offset {
            // Off the end; mark invalid without error.
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts;
            return false;
        }
        self.current = offset;

        let data = &self.block.data[..self.block.restart_offset];
        let Ok((shared, non_shared, value_len, header_len)) = decode_entry_header(&data[offset..])
        else {
            self.corrupt();
            return false;
        };
        let key_start = offset + header_len;
        if shared > self.key.len() || key_start + non_shared + value_len > data.len() {
            self.corrupt();
            return false;
        }

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&data[key_start..key_start + non_shared]);
        self.value_offset = key_start + non_shared;
        self.value_len = value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }
}

impl Cursor for BlockCursor {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        // Walk forward to the final entry.
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            return;
        }
        // Find the last restart point with a key < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let offset = self.block.restart_point(mid);
            let data = &self.block.data[..self.block.restart_offset];
            let Ok((shared, non_shared, _, header_len)) = decode_entry_header(&data[offset..])
            else {
                self.corrupt();
                return;
            };
            if shared != 0 || offset + header_len + non_shared > data.len() {
                self.corrupt();
                return;
            }
            let mid_key = &data[offset + header_len..offset + header_len + non_shared];
            if self.cmp.compare(mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart_point(left);
        // Linear scan to the first key >= target.
        loop {
            if !self.parse_next_entry() {
                return;
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;

        // Back up to the restart point strictly before the current entry.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // Already the first entry.
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        // Scan forward until the entry just before `original`.
        while self.parse_next_entry() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::sstable::builder::BlockBuilder;

    fn build_block(entries: &[(&[u8], &[u8])], restart_interval: usize) -> Arc<Block> {
        let mut builder = BlockBuilder::new(restart_interval);
        for (k, v) in entries {
            builder.add(k, v);
        }
        Arc::new(Block::new(builder.finish().to_vec()).unwrap())
    }

    fn cursor_for(block: &Arc<Block>) -> BlockCursor {
        BlockCursor::new(Arc::clone(block), Arc::new(BytewiseComparator))
    }

    fn collect_forward(cursor: &mut BlockCursor) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        cursor.seek_to_first();
        while cursor.valid() {
            out.push((cursor.key().to_vec(), cursor.value().to_vec()));
            cursor.next();
        }
        out
    }

    const SAMPLE: &[(&[u8], &[u8])] = &[
        (b"apple", b"fruit"),
        (b"application", b"software"),
        (b"apply", b"verb"),
        (b"banana", b"fruit"),
        (b"band", b"music"),
        (b"bandana", b"clothing"),
    ];

    #[test]
    fn test_empty_block() {
        let block = build_block(&[], 16);
        let mut cursor = cursor_for(&block);
        cursor.seek_to_first();
        assert!(!cursor.valid());
        cursor.seek_to_last();
        assert!(!cursor.valid());
        cursor.seek(b"x");
        assert!(!cursor.valid());
        assert!(cursor.status().is_ok());
    }

    #[test]
    fn test_forward_iteration() {
        for interval in [1, 2, 16] {
            let block = build_block(SAMPLE, interval);
            let mut cursor = cursor_for(&block);
            let got = collect_forward(&mut cursor);
            let expected: Vec<_> = SAMPLE
                .iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect();
            assert_eq!(got, expected, "restart interval {interval}");
        }
    }

    #[test]
    fn test_backward_iteration() {
        for interval in [1, 3, 16] {
            let block = build_block(SAMPLE, interval);
            let mut cursor = cursor_for(&block);
            cursor.seek_to_last();
            let mut got = Vec::new();
            while cursor.valid() {
                got.push(cursor.key().to_vec());
                cursor.prev();
            }
            let mut expected: Vec<_> = SAMPLE.iter().map(|(k, _)| k.to_vec()).collect();
            expected.reverse();
            assert_eq!(got, expected, "restart interval {interval}");
        }
    }

    #[test]
    fn test_seek() {
        let block = build_block(SAMPLE, 2);
        let mut cursor = cursor_for(&block);

        cursor.seek(b"app");
        assert!(cursor.valid());
        assert_eq!(cursor.key(), b"apple");

        cursor.seek(b"apple");
        assert_eq!(cursor.key(), b"apple");

        cursor.seek(b"applz");
        assert_eq!(cursor.key(), b"apply");

        cursor.seek(b"bandana");
        assert_eq!(cursor.key(), b"bandana");

        cursor.seek(b"zzz");
        assert!(!cursor.valid());
    }

    #[test]
    fn test_seek_then_prev() {
        let block = build_block(SAMPLE, 2);
        let mut cursor = cursor_for(&block);
        cursor.seek(b"band");
        assert_eq!(cursor.key(), b"band");
        cursor.prev();
        assert_eq!(cursor.key(), b"banana");
        cursor.prev();
        assert_eq!(cursor.key(), b"apply");
    }

    #[test]
    fn test_prev_from_first_invalidates() {
        let block = build_block(SAMPLE, 16);
        let mut cursor = cursor_for(&block);
        cursor.seek_to_first();
        cursor.prev();
        assert!(!cursor.valid());
    }

    #[test]
    fn test_large_block_many_restarts() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..1000u32)
            .map(|i| {
                (
                    format!("key{i:06}").into_bytes(),
                    format!("value{i}").into_bytes(),
                )
            })
            .collect();
        let refs: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let block = build_block(&refs, 16);
        let mut cursor = cursor_for(&block);

        let got = collect_forward(&mut cursor);
        assert_eq!(got.len(), 1000);
        assert_eq!(got[500].0, b"key000500");

        cursor.seek(b"key000777");
        assert_eq!(cursor.key(), b"key000777");
        assert_eq!(cursor.value(), b"value777");
    }

    #[test]
    fn test_corrupt_restart_count_rejected() {
        let block = build_block(SAMPLE, 16);
        let mut data = block.data.clone();
        let len = data.len();
        // Claim more restarts than the block can hold.
        data[len - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(Block::new(data).is_err());
    }

    #[test]
    fn test_corrupt_entry_sets_status() {
        let block = build_block(SAMPLE, 16);
        let mut data = block.data.clone();
        // Stomp the first entry's header with continuation bytes so the
        // varint never terminates.
        for b in data.iter_mut().take(6) {
            *b = 0xff;
        }
        let block = Arc::new(Block::new(data).unwrap());
        let mut cursor = cursor_for(&block);
        cursor.seek_to_first();
        assert!(!cursor.valid());
        assert!(cursor.status().is_err());
    }
}
