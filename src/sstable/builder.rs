//! Block and table construction.

use std::sync::Arc;

use crate::comparator::Comparator;
use crate::env::WritableFile;
use crate::error::{Error, Result};
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{block_trailer, BlockHandle, Compression, Footer};
use crate::util::coding::{put_fixed32, put_varint32};

/// Builds one prefix-compressed block. Keys must arrive in increasing
/// order; every `restart_interval` entries the full key is written so
/// readers can decode from the restart array.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        BlockBuilder {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart point: full key.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished payload.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Payload size if `finish` were called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Streams sorted entries into an on-disk table:
/// data blocks, then filter, metaindex, index, footer.
pub struct TableBuilder {
    cmp: Arc<dyn Comparator>,
    file: Box<dyn WritableFile>,
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    num_entries: u64,
    block_size: usize,
    compression: Compression,
    /// The index entry for a finished data block is buffered until the
    /// next block's first key arrives, so the separator can be shortened.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    closed: bool,
}

/// Knobs the builder needs, extracted from the engine options.
pub struct TableBuilderOptions {
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<crate::filter::FilterPolicyRef>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: Compression,
}

impl TableBuilder {
    pub fn new(options: TableBuilderOptions, file: Box<dyn WritableFile>) -> Result<Self> {
        if options.compression != Compression::None {
            return Err(Error::NotSupported(format!(
                "{:?} compression is not implemented",
                options.compression
            )));
        }
        let mut filter_block = options.filter_policy.map(FilterBlockBuilder::new);
        if let Some(fb) = filter_block.as_mut() {
            fb.start_block(0);
        }
        Ok(TableBuilder {
            cmp: options.comparator,
            file,
            offset: 0,
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index blocks restart on every entry; their keys share little.
            index_block: BlockBuilder::new(1),
            filter_block,
            last_key: Vec::new(),
            num_entries: 0,
            block_size: options.block_size,
            compression: options.compression,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            closed: false,
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.closed);
        debug_assert!(
            self.num_entries == 0
                || self.cmp.compare(key, &self.last_key) == std::cmp::Ordering::Greater,
            "keys must be added in strictly increasing order"
        );

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            let mut separator = std::mem::take(&mut self.last_key);
            self.cmp.find_shortest_separator(&mut separator, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&separator, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(fb) = self.filter_block.as_mut() {
            fb.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Finalizes the current data block and starts a new filter window.
    pub fn flush(&mut self) -> Result<()> {
        debug_assert!(!self.closed);
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);
        self.pending_handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut self.data_block,
        )?;
        self.pending_index_entry = true;
        self.file.flush()?;
        if let Some(fb) = self.filter_block.as_mut() {
            fb.start_block(self.offset);
        }
        Ok(())
    }

    fn write_block(
        file: &mut Box<dyn WritableFile>,
        offset: &mut u64,
        compression: Compression,
        block: &mut BlockBuilder,
    ) -> Result<BlockHandle> {
        let payload = block.finish();
        let handle = Self::write_raw_block(file, offset, compression, payload)?;
        block.reset();
        Ok(handle)
    }

    fn write_raw_block(
        file: &mut Box<dyn WritableFile>,
        offset: &mut u64,
        compression: Compression,
        payload: &[u8],
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(*offset, payload.len() as u64);
        file.append(payload)?;
        file.append(&block_trailer(compression, payload))?;
        *offset += payload.len() as u64 + crate::sstable::format::BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Writes the meta blocks and footer. The table is complete once this
    /// returns; the caller still owns syncing the file.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        debug_assert!(!self.closed);
        self.closed = true;

        // Filter block.
        let filter_handle = match self.filter_block.as_mut() {
            Some(fb) => {
                let payload = fb.finish().to_vec();
                Some((
                    fb.policy_name(),
                    Self::write_raw_block(
                        &mut self.file,
                        &mut self.offset,
                        self.compression,
                        &payload,
                    )?,
                ))
            }
            None => None,
        };

        // Metaindex block: one entry mapping "filter.<policy>" to the
        // filter block's handle.
        let mut metaindex_block = BlockBuilder::new(1);
        if let Some((policy_name, handle)) = filter_handle {
            let key = format!("filter.{policy_name}");
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            metaindex_block.add(key.as_bytes(), &handle_encoding);
        }
        let metaindex_handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut metaindex_block,
        )?;

        // Index block, consuming the final pending entry.
        if self.pending_index_entry {
            let mut last = std::mem::take(&mut self.last_key);
            self.cmp.find_short_successor(&mut last);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&last, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index_handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut self.index_block,
        )?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        self.file.append(&footer_encoding)?;
        self.offset += footer_encoding.len() as u64;
        self.file.flush()?;
        Ok(())
    }

    /// Durably persists the finished table.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; after `finish`, the final file size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_builder_estimate() {
        let mut builder = BlockBuilder::new(16);
        assert!(builder.is_empty());
        let empty_estimate = builder.current_size_estimate();
        builder.add(b"abc", b"123");
        assert!(builder.current_size_estimate() > empty_estimate);
        let payload = builder.finish().to_vec();
        assert_eq!(payload.len(), builder.current_size_estimate());
    }

    #[test]
    fn test_block_builder_reset() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"a", b"1");
        builder.finish();
        builder.reset();
        assert!(builder.is_empty());
        builder.add(b"b", b"2");
        let payload = builder.finish().to_vec();
        let block =
            std::sync::Arc::new(crate::sstable::block::Block::new(payload).unwrap());
        let mut cursor = crate::sstable::block::BlockCursor::new(block, Arc::new(crate::comparator::BytewiseComparator));
        use crate::iterator::Cursor;
        cursor.seek_to_first();
        assert_eq!(cursor.key(), b"b");
        cursor.next();
        assert!(!cursor.valid());
    }

    #[test]
    fn test_prefix_compression_shrinks_shared_keys() {
        let mut compressed = BlockBuilder::new(16);
        let mut uncompressed = BlockBuilder::new(1);
        for i in 0..100u32 {
            let key = format!("commonprefix/{i:04}");
            compressed.add(key.as_bytes(), b"v");
            uncompressed.add(key.as_bytes(), b"v");
        }
        assert!(compressed.current_size_estimate() < uncompressed.current_size_estimate());
    }
}
