//! Immutable sorted-table reader.
//!
//! Opening a table reads the footer, the index block, and (when a filter
//! policy is configured) the filter block. Data blocks are materialized on
//! demand through the block cache; a table cursor composes the index
//! cursor with lazily loaded data-block cursors.

use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::comparator::Comparator;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::filter::FilterPolicyRef;
use crate::iterator::Cursor;
use crate::sstable::block::{Block, BlockCursor};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{
    read_block_contents, BlockHandle, Footer, FOOTER_ENCODED_LENGTH,
};
use crate::util::coding::put_fixed64;

/// Read-path knobs, per operation.
#[derive(Clone, Default)]
pub struct ReadAccess {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

/// What the table layer needs from the engine options.
pub struct TableOptions {
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<FilterPolicyRef>,
    pub block_cache: Option<Arc<ShardedCache<Arc<Block>>>>,
    pub paranoid_checks: bool,
}

pub struct Table {
    file: Arc<dyn RandomAccessFile>,
    cmp: Arc<dyn Comparator>,
    block_cache: Option<Arc<ShardedCache<Arc<Block>>>>,
    /// Distinguishes this table's blocks inside a shared cache.
    cache_id: u64,
    index_block: Arc<Block>,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Reads the footer and metadata of a table file of `size` bytes.
    pub fn open(
        options: TableOptions,
        file: Arc<dyn RandomAccessFile>,
        size: u64,
    ) -> Result<Table> {
        if (size as usize) < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("file is too short to be a table".to_string()));
        }
        let footer_data = file.read_at(
            size - FOOTER_ENCODED_LENGTH as u64,
            FOOTER_ENCODED_LENGTH,
        )?;
        if footer_data.len() != FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("truncated footer read".to_string()));
        }
        let footer = Footer::decode_from(&footer_data)?;

        let index_contents =
            read_block_contents(&file, true /* always check the index */, footer.index_handle)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = options
            .block_cache
            .as_ref()
            .map(|c| c.new_id())
            .unwrap_or(0);

        let mut table = Table {
            file,
            cmp: options.comparator,
            block_cache: options.block_cache,
            cache_id,
            index_block,
            filter: None,
        };
        table.read_meta(&footer, options.filter_policy, options.paranoid_checks)?;
        Ok(table)
    }

    fn read_meta(
        &mut self,
        footer: &Footer,
        filter_policy: Option<FilterPolicyRef>,
        paranoid_checks: bool,
    ) -> Result<()> {
        let Some(policy) = filter_policy else {
            return Ok(());
        };
        let metaindex = match read_block_contents(
            &self.file,
            paranoid_checks,
            footer.metaindex_handle,
        ) {
            Ok(contents) => Arc::new(Block::new(contents)?),
            Err(e) if paranoid_checks => return Err(e),
            Err(_) => return Ok(()), // run without the filter
        };

        let key = format!("filter.{}", policy.name());
        let mut cursor = BlockCursor::new(metaindex, Arc::new(crate::comparator::BytewiseComparator));
        cursor.seek(key.as_bytes());
        if cursor.valid() && cursor.key() == key.as_bytes() {
            let (handle, _) = BlockHandle::decode_from(cursor.value())?;
            let filter_data = read_block_contents(&self.file, paranoid_checks, handle)?;
            self.filter = FilterBlockReader::new(policy, filter_data);
        }
        Ok(())
    }

    /// Loads the data block for `handle`, consulting the block cache.
    fn block(&self, access: &ReadAccess, handle: BlockHandle) -> Result<Arc<Block>> {
        let Some(cache) = self.block_cache.as_ref() else {
            let contents = read_block_contents(&self.file, access.verify_checksums, handle)?;
            return Ok(Arc::new(Block::new(contents)?));
        };

        let mut cache_key = Vec::with_capacity(16);
        put_fixed64(&mut cache_key, self.cache_id);
        put_fixed64(&mut cache_key, handle.offset);

        if let Some(cached) = cache.lookup(&cache_key) {
            return Ok(Arc::clone(cached.value()));
        }
        let contents = read_block_contents(&self.file, access.verify_checksums, handle)?;
        let block = Arc::new(Block::new(contents)?);
        if access.fill_cache {
            cache.insert(&cache_key, Arc::clone(&block), block.size());
        }
        Ok(block)
    }

    /// Point read: index seek, optional filter probe, data-block seek.
    /// Returns the raw `(key, value)` entry found at or after `key`, or
    /// `None` when the filter proves absence or the table has no such
    /// entry. Callers compare the returned key to the target.
    pub fn internal_get(
        &self,
        access: &ReadAccess,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_cursor = BlockCursor::new(Arc::clone(&self.index_block), Arc::clone(&self.cmp));
        index_cursor.seek(key);
        if !index_cursor.valid() {
            index_cursor.status()?;
            return Ok(None);
        }

        let (handle, _) = BlockHandle::decode_from(index_cursor.value())?;
        if let Some(filter) = self.filter.as_ref() {
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }

        let block = self.block(access, handle)?;
        let mut block_cursor = BlockCursor::new(block, Arc::clone(&self.cmp));
        block_cursor.seek(key);
        if !block_cursor.valid() {
            block_cursor.status()?;
            return Ok(None);
        }
        Ok(Some((
            block_cursor.key().to_vec(),
            block_cursor.value().to_vec(),
        )))
    }
}

/// Two-level cursor: an index cursor whose values locate data blocks, and
/// a cursor within the current data block. Remembers the handle of the
/// materialized block so repositioning within it costs nothing.
pub struct TableCursor {
    table: Arc<Table>,
    access: ReadAccess,
    index: BlockCursor,
    data: Option<BlockCursor>,
    data_block_handle: Option<BlockHandle>,
    status: Result<()>,
}

impl TableCursor {
    /// Ordered cursor over every entry in `table`.
    pub fn new(table: Arc<Table>, access: ReadAccess) -> TableCursor {
        let index = BlockCursor::new(Arc::clone(&table.index_block), Arc::clone(&table.cmp));
        TableCursor {
            table,
            access,
            index,
            data: None,
            data_block_handle: None,
            status: Ok(()),
        }
    }

    /// Materializes the data block the index currently points at.
    fn init_data_block(&mut self) {
        if !self.index.valid() {
            self.data = None;
            self.data_block_handle = None;
            return;
        }
        let handle = match BlockHandle::decode_from(self.index.value()) {
            Ok((handle, _)) => handle,
            Err(e) => {
                self.record_status(Err(e));
                self.data = None;
                self.data_block_handle = None;
                return;
            }
        };
        if self.data.is_some() && self.data_block_handle == Some(handle) {
            return;
        }
        match self.table.block(&self.access, handle) {
            Ok(block) => {
                self.data = Some(BlockCursor::new(block, Arc::clone(&self.table.cmp)));
                self.data_block_handle = Some(handle);
            }
            Err(e) => {
                self.record_status(Err(e));
                self.data = None;
                self.data_block_handle = None;
            }
        }
    }

    fn record_status(&mut self, status: Result<()>) {
        if self.status.is_ok() {
            self.status = status;
        }
    }

    /// Advances the index past empty or unreadable data blocks.
    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index.valid() {
                self.data = None;
                self.data_block_handle = None;
                return;
            }
            self.index.next();
            self.init_data_block();
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index.valid() {
                self.data = None;
                self.data_block_handle = None;
                return;
            }
            self.index.prev();
            self.init_data_block();
            if let Some(data) = self.data.as_mut() {
                data.seek_to_last();
            }
        }
    }
}

impl Cursor for TableCursor {
    fn valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.valid())
    }

    fn seek_to_first(&mut self) {
        self.index.seek_to_first();
        self.init_data_block();
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index.seek_to_last();
        self.init_data_block();
        if let Some(data) = self.data.as_mut() {
            data.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index.seek(target);
        self.init_data_block();
        if let Some(data) = self.data.as_mut() {
            data.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.data.as_mut().expect("valid cursor").next();
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        self.data.as_mut().expect("valid cursor").prev();
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data.as_ref().expect("valid cursor").key()
    }

    fn value(&self) -> &[u8] {
        self.data.as_ref().expect("valid cursor").value()
    }

    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.index.status()?;
        if let Some(data) = self.data.as_ref() {
            data.status()?;
        }
        Ok(())
    }
}

/// A `TableCursor` that keeps extra resources alive for its lifetime,
/// e.g. the table-cache handle that pins the open file.
pub struct OwningTableCursor<G: Send> {
    inner: TableCursor,
    _guard: G,
}

impl<G: Send> OwningTableCursor<G> {
    pub fn new(inner: TableCursor, guard: G) -> Self {
        OwningTableCursor {
            inner,
            _guard: guard,
        }
    }
}

impl<G: Send> Cursor for OwningTableCursor<G> {
    fn valid(&self) -> bool {
        self.inner.valid()
    }
    fn seek_to_first(&mut self) {
        self.inner.seek_to_first()
    }
    fn seek_to_last(&mut self) {
        self.inner.seek_to_last()
    }
    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target)
    }
    fn next(&mut self) {
        self.inner.next()
    }
    fn prev(&mut self) {
        self.inner.prev()
    }
    fn key(&self) -> &[u8] {
        self.inner.key()
    }
    fn value(&self) -> &[u8] {
        self.inner.value()
    }
    fn status(&self) -> Result<()> {
        self.inner.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::env::default_env;
    use crate::filter::BloomFilterPolicy;
    use crate::sstable::builder::{TableBuilder, TableBuilderOptions};
    use crate::sstable::format::Compression;
    use crate::tmpfs::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn builder_options(filtered: bool) -> TableBuilderOptions {
        TableBuilderOptions {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: filtered.then(|| {
                Arc::new(BloomFilterPolicy::new(10)) as FilterPolicyRef
            }),
            block_size: 512,
            block_restart_interval: 16,
            compression: Compression::None,
        }
    }

    fn table_options(filtered: bool, cache: bool) -> TableOptions {
        TableOptions {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: filtered.then(|| {
                Arc::new(BloomFilterPolicy::new(10)) as FilterPolicyRef
            }),
            block_cache: cache.then(|| Arc::new(ShardedCache::new(8 << 20))),
            paranoid_checks: true,
        }
    }

    fn build_table(
        dir: &TempDir,
        name: &str,
        entries: &[(Vec<u8>, Vec<u8>)],
        filtered: bool,
    ) -> (std::path::PathBuf, u64) {
        let path = dir.path().join(name);
        let env = default_env();
        let file = env.new_writable_file(&path).unwrap();
        let mut builder = TableBuilder::new(builder_options(filtered), file).unwrap();
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap();
        builder.sync().unwrap();
        let size = builder.file_size();
        assert_eq!(env.file_size(&path).unwrap(), size);
        (path, size)
    }

    fn sample_entries(n: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    format!("key{i:06}").into_bytes(),
                    format!("value-{i}").into_bytes(),
                )
            })
            .collect()
    }

    fn open_table(path: &std::path::Path, size: u64, filtered: bool, cache: bool) -> Arc<Table> {
        let env = default_env();
        let file = env.new_random_access_file(path).unwrap();
        Arc::new(Table::open(table_options(filtered, cache), file, size).unwrap())
    }

    #[test]
    fn test_build_then_scan() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(1000);
        let (path, size) = build_table(&dir, "t.ldb", &entries, false);
        let table = open_table(&path, size, false, true);

        let mut cursor = TableCursor::new(Arc::clone(&table), ReadAccess {
            verify_checksums: true,
            fill_cache: true,
        });
        cursor.seek_to_first();
        let mut got = Vec::new();
        while cursor.valid() {
            got.push((cursor.key().to_vec(), cursor.value().to_vec()));
            cursor.next();
        }
        assert!(cursor.status().is_ok());
        assert_eq!(got, entries);
    }

    #[test]
    fn test_seek_and_reverse_scan() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(500);
        let (path, size) = build_table(&dir, "t.ldb", &entries, false);
        let table = open_table(&path, size, false, false);

        let mut cursor = TableCursor::new(Arc::clone(&table), ReadAccess::default());
        cursor.seek(b"key000250");
        assert!(cursor.valid());
        assert_eq!(cursor.key(), b"key000250");
        cursor.prev();
        assert_eq!(cursor.key(), b"key000249");

        cursor.seek_to_last();
        let mut count = 0;
        while cursor.valid() {
            count += 1;
            cursor.prev();
        }
        assert_eq!(count, 500);
    }

    #[test]
    fn test_internal_get_finds_entries() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(200);
        let (path, size) = build_table(&dir, "t.ldb", &entries, true);
        let table = open_table(&path, size, true, true);

        let access = ReadAccess {
            verify_checksums: true,
            fill_cache: true,
        };
        for (k, v) in &entries {
            let found = table.internal_get(&access, k).unwrap().unwrap();
            assert_eq!(&found.0, k);
            assert_eq!(&found.1, v);
        }
        // A key past the end finds nothing.
        assert!(table.internal_get(&access, b"zzz").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(10);
        let (path, size) = build_table(&dir, "t.ldb", &entries, false);
        // Stomp the magic number.
        let mut raw = std::fs::read(&path).unwrap();
        let len = raw.len();
        raw[len - 1] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let env = default_env();
        let file = env.new_random_access_file(&path).unwrap();
        let err = Table::open(table_options(false, false), file, size).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_corrupt_block_detected() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(100);
        let (path, size) = build_table(&dir, "t.ldb", &entries, false);
        // Flip a byte early in the first data block.
        let mut raw = std::fs::read(&path).unwrap();
        raw[10] ^= 0x01;
        std::fs::write(&path, raw).unwrap();

        let table = open_table(&path, size, false, false);
        let access = ReadAccess {
            verify_checksums: true,
            fill_cache: false,
        };
        let err = table.internal_get(&access, b"key000000").unwrap_err();
        assert!(err.is_corruption());
    }

    /// Counts positioned reads so tests can assert how many block fetches
    /// a lookup performed.
    struct CountingFile {
        inner: Arc<dyn RandomAccessFile>,
        reads: Arc<AtomicUsize>,
    }

    impl RandomAccessFile for CountingFile {
        fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(offset, len)
        }
    }

    #[test]
    fn test_filter_skips_data_block_reads() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ];
        let (path, size) = build_table(&dir, "t.ldb", &entries, true);

        let env = default_env();
        let reads = Arc::new(AtomicUsize::new(0));
        let file: Arc<dyn RandomAccessFile> = Arc::new(CountingFile {
            inner: env.new_random_access_file(&path).unwrap(),
            reads: Arc::clone(&reads),
        });
        let table = Table::open(table_options(true, false), file, size).unwrap();

        let opened_reads = reads.load(Ordering::SeqCst);
        let access = ReadAccess::default();
        // "bb" is absent and the bloom filter proves it: zero additional
        // reads.
        assert!(table.internal_get(&access, b"bb").unwrap().is_none());
        assert_eq!(reads.load(Ordering::SeqCst), opened_reads);

        // A present key costs exactly one data-block read.
        assert!(table.internal_get(&access, b"b").unwrap().is_some());
        assert_eq!(reads.load(Ordering::SeqCst), opened_reads + 1);
    }

    #[test]
    fn test_block_cache_avoids_rereads() {
        let dir = TempDir::new().unwrap();
        let entries = sample_entries(50);
        let (path, size) = build_table(&dir, "t.ldb", &entries, false);

        let env = default_env();
        let reads = Arc::new(AtomicUsize::new(0));
        let file: Arc<dyn RandomAccessFile> = Arc::new(CountingFile {
            inner: env.new_random_access_file(&path).unwrap(),
            reads: Arc::clone(&reads),
        });
        let table = Table::open(table_options(false, true), file, size).unwrap();

        let access = ReadAccess {
            verify_checksums: false,
            fill_cache: true,
        };
        table.internal_get(&access, b"key000010").unwrap().unwrap();
        let after_first = reads.load(Ordering::SeqCst);
        // Same block again: served from cache.
        table.internal_get(&access, b"key000011").unwrap().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), after_first);
    }
}
