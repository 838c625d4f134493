//! State reconstruction on open.
//!
//! The directory is the source of truth: classify every file, rebuild the
//! sorted-table set (scanning the tables fixes the sequence counter), then
//! replay the log files in ascending numeric order. Replay applies each
//! record as a write batch, spilling to fresh tables whenever the memtable
//! fills, and finally either adopts the last log as the active log
//! (`reuse_logs`) or flushes the residue and starts a fresh one.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::batch::{WriteBatch, BATCH_HEADER_SIZE};
use crate::config::{Options, ReadOptions};
use crate::dbformat::{parse_internal_key, InternalKey, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::filename::{log_file_name, parse_file_name, sst_table_file_name, table_file_name, FileType};
use crate::memtable::MemTable;
use crate::table_cache::TableCache;
use crate::wal::{Reader, Reporter, Writer};

use super::{build_table, DbState, FileMeta};

/// Routes reader corruption reports to the log and, under
/// `paranoid_checks`, into a status the caller inspects.
#[derive(Clone)]
struct LogReporter {
    fname: String,
    status: Arc<Mutex<Result<()>>>,
}

impl LogReporter {
    fn new(fname: String) -> Self {
        LogReporter {
            fname,
            status: Arc::new(Mutex::new(Ok(()))),
        }
    }

    fn status(&self) -> Result<()> {
        self.status.lock().unwrap().clone()
    }
}

impl Reporter for LogReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        tracing::warn!(
            file = %self.fname,
            bytes,
            reason,
            "dropping corrupt log region"
        );
        let mut status = self.status.lock().unwrap();
        if status.is_ok() {
            *status = Err(Error::corruption(reason, &self.fname));
        }
    }
}

pub(super) fn recover(
    dbname: &Path,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &TableCache,
) -> Result<DbState> {
    let env = &options.env;

    // Classify the directory.
    let mut log_numbers = Vec::new();
    let mut table_numbers = Vec::new();
    let mut max_number = 0u64;
    for name in env.children(dbname)? {
        let Some((number, file_type)) = parse_file_name(&name) else {
            continue;
        };
        max_number = max_number.max(number);
        match file_type {
            FileType::Log => log_numbers.push(number),
            FileType::Table => table_numbers.push(number),
            _ => {}
        }
    }
    log_numbers.sort_unstable();
    table_numbers.sort_unstable();
    let mut next_file_number = (max_number + 1).max(1);

    let db_exists = !table_numbers.is_empty() || !log_numbers.is_empty();
    if !db_exists {
        if !options.create_if_missing {
            return Err(crate::errinput!(
                "{} does not exist (create_if_missing is false)",
                dbname.display()
            ));
        }
    } else if options.error_if_exists {
        return Err(crate::errinput!(
            "{} exists (error_if_exists is true)",
            dbname.display()
        ));
    }

    // Rebuild the table set; malformed tables are skipped, not fatal.
    let mut files = Vec::new();
    for &number in &table_numbers {
        match recover_table(dbname, options, table_cache, number) {
            Ok(Some(meta)) => files.push(meta),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(table = number, error = %e, "skipping unreadable table");
            }
        }
    }

    // Fix the sequence counter from the tables' entries.
    let mut sequence = 0;
    let mut found_sequence = false;
    let scan_options = ReadOptions::new().verify_checksums(options.paranoid_checks);
    for file in &files {
        let mut cursor = table_cache.cursor(&scan_options, file.number, file.file_size)?;
        cursor.seek_to_first();
        while cursor.valid() {
            let parsed = parse_internal_key(cursor.key())
                .map_err(|_| Error::corruption("bad internal key in table", file.number))?;
            found_sequence = true;
            sequence = sequence.max(parsed.sequence);
            cursor.next();
        }
        cursor.status()?;
    }
    let mut sequence = if found_sequence { sequence + 1 } else { 0 };

    // Replay the logs oldest-first.
    let mut mem = Arc::new(MemTable::new(icmp.clone()));
    let mut active_log: Option<(Writer, u64)> = None;
    let log_count = log_numbers.len();
    for (i, &log_number) in log_numbers.iter().enumerate() {
        let last_log = i + 1 == log_count;
        let path = log_file_name(dbname, log_number);
        let file = env.new_sequential_file(&path)?;
        let reporter = LogReporter::new(path.display().to_string());
        let mut reader = Reader::new(file, Some(Box::new(reporter.clone())), true, 0);
        let mut compactions = 0usize;

        while let Some(record) = reader.read_record() {
            if options.paranoid_checks && reporter.status().is_err() {
                break;
            }
            if record.len() < BATCH_HEADER_SIZE {
                reporter.clone().corruption(record.len(), "log record too small");
                continue;
            }
            let mut batch = WriteBatch::new();
            batch.set_contents(&record)?;
            batch.insert_into(&mem)?;

            let next = batch.sequence() + batch.count() as u64;
            if next > sequence {
                sequence = next;
            }

            if mem.approximate_memory_usage() > options.write_buffer_size {
                compactions += 1;
                let table_number = next_file_number;
                next_file_number += 1;
                if let Some(meta) =
                    build_table(dbname, options, table_cache, table_number, &mem)?
                {
                    files.push(meta);
                }
                mem = Arc::new(MemTable::new(icmp.clone()));
            }
        }
        if options.paranoid_checks {
            reporter.status()?;
        }

        // Adopt an untouched final log as the active log.
        if options.reuse_logs && last_log && compactions == 0 {
            match (env.file_size(&path), env.new_appendable_file(&path)) {
                (Ok(size), Ok(appendable)) => {
                    tracing::info!(log = log_number, tail = size, "reusing last log file");
                    active_log = Some((Writer::with_tail(appendable, size), log_number));
                    continue;
                }
                _ => {
                    // Fall through to the flush-and-replace path.
                }
            }
        }

        // Make the replayed entries durable, then drop the consumed log.
        if mem.approximate_memory_usage() > 0 {
            let table_number = next_file_number;
            next_file_number += 1;
            if let Some(meta) = build_table(dbname, options, table_cache, table_number, &mem)? {
                files.push(meta);
            }
            mem = Arc::new(MemTable::new(icmp.clone()));
        }
        let _ = env.remove_file(&path);
    }

    let (log, log_number) = match active_log {
        Some(adopted) => adopted,
        None => {
            let number = next_file_number;
            next_file_number += 1;
            let file = env.new_writable_file(&log_file_name(dbname, number))?;
            (Writer::new(file), number)
        }
    };

    Ok(DbState {
        mem,
        imm: None,
        log,
        log_number,
        files,
        sequence,
        next_file_number,
    })
}

/// Opens table `number`, recovering its key bounds from a full-range
/// cursor. `None` for an empty table.
fn recover_table(
    dbname: &Path,
    options: &Options,
    table_cache: &TableCache,
    number: u64,
) -> Result<Option<FileMeta>> {
    let env = &options.env;
    let file_size = env
        .file_size(&table_file_name(dbname, number))
        .or_else(|_| env.file_size(&sst_table_file_name(dbname, number)))?;

    let mut cursor = table_cache.cursor(&ReadOptions::new(), number, file_size)?;
    cursor.seek_to_first();
    if !cursor.valid() {
        cursor.status()?;
        return Ok(None);
    }
    let smallest = InternalKey::decode_from(cursor.key());
    cursor.seek_to_last();
    if !cursor.valid() {
        cursor.status()?;
        return Ok(None);
    }
    let largest = InternalKey::decode_from(cursor.key());
    cursor.status()?;

    Ok(Some(FileMeta {
        number,
        file_size,
        smallest,
        largest,
    }))
}
