//! Write-ahead log record format.
//!
//! The log is a sequence of 32 KiB blocks. Each physical record is
//!
//! ```text
//! +-----------------+-------------+-----------+----------------+
//! | crc32c (masked) | length: u16 | type: u8  | payload        |
//! +-----------------+-------------+-----------+----------------+
//! |     4 bytes     |   2 bytes   |  1 byte   | `length` bytes |
//! +-----------------+-------------+-----------+----------------+
//! ```
//!
//! A logical record that does not fit in the current block is split into
//! `First`, `Middle`*, `Last` fragments; an unsplit record is `Full`. A
//! block tail smaller than the 7-byte header is zero-padded. The CRC
//! covers `type ‖ payload` and is masked so that runs of zero bytes do not
//! look like a valid record.

pub mod reader;
pub mod writer;

pub use reader::{Reader, Reporter};
pub use writer::Writer;

use crc::{Crc, CRC_32_ISCSI};

pub const BLOCK_SIZE: usize = 32 * 1024;
pub const HEADER_SIZE: usize = 7;

/// CRC32C, shared by the log and sorted-table trailers.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282ead8;

/// Masks a CRC stored alongside the data it covers.
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for zero-padded regions; never written as a record type.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

#[cfg(test)]
pub(crate) mod testutil {
    //! In-memory file doubles shared by the WAL tests.

    use std::sync::{Arc, Mutex};

    use crate::env::{SequentialFile, WritableFile};
    use crate::error::Result;

    #[derive(Clone, Default)]
    pub struct MemStore {
        pub data: Arc<Mutex<Vec<u8>>>,
    }

    impl MemStore {
        pub fn contents(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }

        pub fn set_contents(&self, bytes: Vec<u8>) {
            *self.data.lock().unwrap() = bytes;
        }

        pub fn writer(&self) -> MemWritableFile {
            MemWritableFile { store: self.clone() }
        }

        pub fn reader(&self) -> MemSequentialFile {
            MemSequentialFile {
                store: self.clone(),
                pos: 0,
            }
        }
    }

    pub struct MemWritableFile {
        store: MemStore,
    }

    impl WritableFile for MemWritableFile {
        fn append(&mut self, data: &[u8]) -> Result<()> {
            self.store.data.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn sync(&mut self) -> Result<()> {
            Ok(())
        }
    }

    pub struct MemSequentialFile {
        store: MemStore,
        pos: usize,
    }

    impl SequentialFile for MemSequentialFile {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let data = self.store.data.lock().unwrap();
            let n = buf.len().min(data.len().saturating_sub(self.pos));
            buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
        fn skip(&mut self, n: u64) -> Result<()> {
            self.pos += n as usize;
            Ok(())
        }
    }
}
