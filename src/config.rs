//! Engine configuration.

use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::dbformat::SequenceNumber;
use crate::env::{default_env, Env};
use crate::filter::FilterPolicyRef;
use crate::sstable::{Block, Compression};

/// Options controlling an engine instance, builder style:
///
/// ```
/// use cinderdb::config::Options;
///
/// let options = Options::default()
///     .create_if_missing(true)
///     .write_buffer_size(8 << 20);
/// ```
#[derive(Clone)]
pub struct Options {
    /// Create the directory on open if absent.
    pub create_if_missing: bool,

    /// Fail open if the directory already contains a database.
    pub error_if_exists: bool,

    /// Treat recovery-time corruption as fatal instead of logging it.
    pub paranoid_checks: bool,

    /// Memtable flush threshold in bytes (default: 4 MiB).
    pub write_buffer_size: usize,

    /// Upper bound on open file handles; the table cache keeps this many
    /// minus a small reserve (default: 1000).
    pub max_open_files: usize,

    /// Target size of a sorted-table data block (default: 4 KiB).
    pub block_size: usize,

    /// Entries between restart points in data blocks (default: 16).
    pub block_restart_interval: usize,

    /// Shared cache of decoded data blocks. `None` disables block caching.
    pub block_cache: Option<Arc<ShardedCache<Arc<Block>>>>,

    /// Filter policy for skipping data-block reads. `None` disables
    /// filters.
    pub filter_policy: Option<FilterPolicyRef>,

    /// User-key ordering (default: bytewise).
    pub comparator: Arc<dyn Comparator>,

    /// Block codec. Only `None` can be written.
    pub compression: Compression,

    /// Try to adopt the last log file on recovery instead of starting a
    /// fresh one.
    pub reuse_logs: bool,

    /// Platform filesystem; injected for tests, defaulted otherwise.
    pub env: Arc<dyn Env>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            block_cache: None,
            filter_policy: None,
            comparator: Arc::new(BytewiseComparator),
            compression: Compression::None,
            reuse_logs: false,
            env: default_env(),
        }
    }
}

impl Options {
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.paranoid_checks = value;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn block_restart_interval(mut self, entries: usize) -> Self {
        self.block_restart_interval = entries;
        self
    }

    pub fn block_cache(mut self, cache: Arc<ShardedCache<Arc<Block>>>) -> Self {
        self.block_cache = Some(cache);
        self
    }

    pub fn filter_policy(mut self, policy: FilterPolicyRef) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn reuse_logs(mut self, value: bool) -> Self {
        self.reuse_logs = value;
        self
    }

    pub fn env(mut self, env: Arc<dyn Env>) -> Self {
        self.env = env;
        self
    }
}

/// Per-read options.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Verify block and log checksums on this read.
    pub verify_checksums: bool,

    /// Populate the block cache with blocks this read touches
    /// (default: true).
    pub fill_cache: bool,

    /// Read as of this sequence number; `None` reads the latest state.
    pub snapshot: Option<SequenceNumber>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }

    pub fn snapshot(mut self, seq: SequenceNumber) -> Self {
        self.snapshot = Some(seq);
        self
    }
}

/// Per-write options.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Fsync the log before acknowledging the write. Without it a machine
    /// crash can lose recent writes; a process crash cannot.
    pub sync: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert!(!options.create_if_missing);
        assert_eq!(options.write_buffer_size, 4 * 1024 * 1024);
        assert_eq!(options.max_open_files, 1000);
        assert_eq!(options.block_size, 4096);
        assert_eq!(options.block_restart_interval, 16);
        assert_eq!(options.compression, Compression::None);
        assert!(options.block_cache.is_none());
        assert!(options.filter_policy.is_none());
    }

    #[test]
    fn test_builder_chains() {
        let options = Options::default()
            .create_if_missing(true)
            .error_if_exists(true)
            .paranoid_checks(true)
            .write_buffer_size(256)
            .block_size(1024)
            .reuse_logs(true);
        assert!(options.create_if_missing);
        assert!(options.error_if_exists);
        assert!(options.paranoid_checks);
        assert_eq!(options.write_buffer_size, 256);
        assert_eq!(options.block_size, 1024);
        assert!(options.reuse_logs);
    }

    #[test]
    fn test_read_options_default_fills_cache() {
        assert!(ReadOptions::new().fill_cache);
        assert!(!ReadOptions::new().verify_checksums);
        assert!(ReadOptions::new().snapshot.is_none());
    }
}
