//! CinderDB: an embedded, ordered key/value storage engine in the
//! log-structured merge-tree style.
//!
//! Writes land in a write-ahead log and an in-memory sorted buffer; full
//! buffers become immutable sorted tables on disk. Reads see a layered,
//! snapshot-consistent view across the memtables and tables. Recovery
//! replays the log, so every acknowledged write survives an abrupt
//! termination.
//!
//! ```no_run
//! use cinderdb::{Database, Options, ReadOptions, WriteOptions};
//!
//! # fn main() -> cinderdb::Result<()> {
//! let db = Database::open(Options::default().create_if_missing(true), "/tmp/demo")?;
//! db.put(&WriteOptions::new(), b"planet", b"mars")?;
//! assert_eq!(db.get(&ReadOptions::new(), b"planet")?, b"mars");
//! # Ok(())
//! # }
//! ```

pub mod asyncdb;
pub mod batch;
pub mod cache;
pub mod comparator;
pub mod config;
pub mod db;
pub mod dbformat;
pub mod env;
pub mod error;
pub mod filename;
pub mod filter;
pub mod flock;
pub mod iterator;
pub mod memtable;
pub mod scheduler;
pub mod skiplist;
pub mod sstable;
pub mod table_cache;
pub mod tmpfs;
pub mod util;
pub mod wal;

pub use asyncdb::{AsyncDatabase, AsyncOp};
pub use batch::WriteBatch;
pub use config::{Options, ReadOptions, WriteOptions};
pub use db::{Database, DbCursor};
pub use error::{Error, Result};
pub use iterator::Cursor;
pub use scheduler::Scheduler;
