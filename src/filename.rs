//! Database file-name grammar.
//!
//! Every file the engine owns inside its directory matches exactly one of:
//!
//! ```text
//! <n>.log        write-ahead log
//! <n>.ldb        sorted table
//! <n>.sst        sorted table (older suffix, still read)
//! MANIFEST-<n>   version manifest
//! CURRENT        pointer to the live manifest
//! LOCK           advisory directory lock
//! LOG, LOG.old   info log and its predecessor
//! ```
//!
//! Numeric parts are zero-padded decimal.

use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Manifest,
    Current,
    DbLock,
    InfoLog,
}

pub fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.log"))
}

pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.ldb"))
}

/// Older tables may carry the `.sst` suffix; readers try both.
pub fn sst_table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.sst"))
}

pub fn lock_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOCK")
}

pub fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

pub fn manifest_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("MANIFEST-{number:06}"))
}

pub fn info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG")
}

pub fn old_info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG.old")
}

/// Classifies a file name (not a path). Returns `None` for anything the
/// grammar does not own.
pub fn parse_file_name(name: &str) -> Option<(u64, FileType)> {
    match name {
        "CURRENT" => return Some((0, FileType::Current)),
        "LOCK" => return Some((0, FileType::DbLock)),
        "LOG" | "LOG.old" => return Some((0, FileType::InfoLog)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let number = parse_number(rest)?;
        return Some((number, FileType::Manifest));
    }
    if let Some(rest) = name.strip_suffix(".log") {
        return Some((parse_number(rest)?, FileType::Log));
    }
    if let Some(rest) = name.strip_suffix(".ldb").or_else(|| name.strip_suffix(".sst")) {
        return Some((parse_number(rest)?, FileType::Table));
    }
    None
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
