//! Cache of open sorted-table handles.
//!
//! Maps a file number to its parsed [`Table`] (and open file handle),
//! bounded by the open-file budget. Backed by the same sharded LRU as the
//! block cache, instantiated for table handles; pinning keeps a table open
//! for as long as a cursor built from it lives.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{Handle, ShardedCache};
use crate::config::{Options, ReadOptions};
use crate::error::Result;
use crate::iterator::Cursor;
use crate::sstable::table::{OwningTableCursor, TableCursor};
use crate::sstable::{ReadAccess, Table, TableOptions};
use crate::filename::{sst_table_file_name, table_file_name};
use crate::util::coding::put_fixed64;

/// File handles the engine reserves for the log, the lock, and directory
/// scans; everything else feeds the table cache.
pub const NUM_NON_TABLE_CACHE_FILES: usize = 10;

pub struct TableCache {
    dbname: PathBuf,
    options: Options,
    cache: Arc<ShardedCache<Arc<Table>>>,
}

impl TableCache {
    pub fn new(dbname: PathBuf, options: Options) -> Self {
        let entries = options
            .max_open_files
            .saturating_sub(NUM_NON_TABLE_CACHE_FILES)
            .max(1);
        TableCache {
            dbname,
            options,
            cache: Arc::new(ShardedCache::new(entries)),
        }
    }

    fn find_table(&self, file_number: u64, file_size: u64) -> Result<Handle<Arc<Table>>> {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(handle);
        }

        let env = &self.options.env;
        let path = table_file_name(&self.dbname, file_number);
        let file = match env.new_random_access_file(&path) {
            Ok(file) => file,
            // Fall back to the older .sst suffix.
            Err(_) => env.new_random_access_file(&sst_table_file_name(&self.dbname, file_number))?,
        };

        let table = Table::open(
            TableOptions {
                comparator: Arc::clone(&self.options.comparator),
                filter_policy: self.options.filter_policy.clone(),
                block_cache: self.options.block_cache.clone(),
                paranoid_checks: self.options.paranoid_checks,
            },
            file,
            file_size,
        )?;
        Ok(self.cache.insert(&key, Arc::new(table), 1))
    }

    /// Cursor over the table; keeps the cache entry pinned for the
    /// cursor's lifetime.
    pub fn cursor(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Result<Box<dyn Cursor>> {
        let handle = self.find_table(file_number, file_size)?;
        let table = Arc::clone(handle.value());
        let cursor = TableCursor::new(table, ReadAccess {
            verify_checksums: read_options.verify_checksums,
            fill_cache: read_options.fill_cache,
        });
        Ok(Box::new(OwningTableCursor::new(cursor, handle)))
    }

    /// Point read through the cached table. Returns the entry found at or
    /// after `internal_key`, as `internal_get` does.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let handle = self.find_table(file_number, file_size)?;
        handle.value().internal_get(
            &ReadAccess {
                verify_checksums: read_options.verify_checksums,
                fill_cache: read_options.fill_cache,
            },
            internal_key,
        )
    }

    /// Drops the cached handle for a table, e.g. after deleting its file.
    pub fn evict(&self, file_number: u64) {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        self.cache.erase(&key);
    }
}
