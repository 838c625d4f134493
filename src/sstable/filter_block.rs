//! Filter block construction and probing.
//!
//! One filter is generated per 2 KiB window of data-block offsets, so a
//! reader maps a block offset straight to a filter index:
//!
//! ```text
//! [filter 0]…[filter n-1] [offset of filter i: u32]×n [array offset: u32] [base lg: u8]
//! ```

use crate::filter::FilterPolicyRef;
use crate::util::coding::{decode_fixed32, put_fixed32};

/// Generate a filter every 2 KiB of data offsets.
const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: FilterPolicyRef,
    /// Flattened key bytes with a parallel offset list, so key slices can
    /// be re-borrowed when a filter is generated.
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: FilterPolicyRef) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Announces that a data block begins at `block_offset`; generates
    /// filters for every window that ends before it.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            // Window with no keys: an empty filter slot.
            return;
        }
        self.starts.push(self.keys.len()); // sentinel
        let key_slices: Vec<&[u8]> = self
            .starts
            .windows(2)
            .map(|w| &self.keys[w[0]..w[1]])
            .collect();
        self.policy.create_filter(&key_slices, &mut self.result);
        self.keys.clear();
        self.starts.clear();
    }

    pub fn finish(&mut self) -> &[u8] {
        if !self.starts.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in &offsets {
            put_fixed32(&mut self.result, *offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG);
        &self.result
    }
}

pub struct FilterBlockReader {
    policy: FilterPolicyRef,
    data: Vec<u8>,
    /// Start of the offset array.
    array_offset: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Returns `None` when the block is malformed; the caller then skips
    /// filtering rather than failing the read.
    pub fn new(policy: FilterPolicyRef, data: Vec<u8>) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        let base_lg = data[data.len() - 1];
        let array_offset = decode_fixed32(&data[data.len() - 5..]) as usize;
        if array_offset > data.len() - 5 {
            return None;
        }
        let num_filters = (data.len() - 5 - array_offset) / 4;
        Some(FilterBlockReader {
            policy,
            data,
            array_offset,
            num_filters,
            base_lg,
        })
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            // Out of range: err on the side of reading the block.
            return true;
        }
        let start =
            decode_fixed32(&self.data[self.array_offset + index * 4..]) as usize;
        let limit = if index + 1 < self.num_filters {
            decode_fixed32(&self.data[self.array_offset + (index + 1) * 4..]) as usize
        } else {
            self.array_offset
        };
        if start > limit || limit > self.array_offset {
            // Malformed entry: treat as a match.
            return true;
        }
        if start == limit {
            // Empty window: nothing was stored here.
            return false;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
