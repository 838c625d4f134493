use crate::env::WritableFile;
use crate::error::Result;
use crate::util::coding::encode_fixed32;
use crate::wal::{mask_crc, RecordType, BLOCK_SIZE, CRC32, HEADER_SIZE};

/// Appends logical records to a log file, fragmenting across 32 KiB block
/// boundaries. Fragmentation depends only on the space left in the current
/// block, never on record contents.
pub struct Writer {
    dest: Box<dyn WritableFile>,
    /// Write position within the current block.
    block_offset: usize,
}

impl Writer {
    pub fn new(dest: Box<dyn WritableFile>) -> Self {
        Writer {
            dest,
            block_offset: 0,
        }
    }

    /// Resumes writing a log whose tail is `dest_length` bytes (log reuse
    /// on recovery): the block offset continues where the file left off.
    pub fn with_tail(dest: Box<dyn WritableFile>, dest_length: u64) -> Self {
        Writer {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
        }
    }

    /// Appends one logical record. An empty payload still emits a
    /// zero-length `Full` record.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut left = payload;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Too small for a header: pad out the block.
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];
                    self.dest.append(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                return Ok(());
            }
        }
    }

    fn emit_physical_record(&mut self, t: RecordType, fragment: &[u8]) -> Result<()> {
        debug_assert!(fragment.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + fragment.len() <= BLOCK_SIZE);

        let mut digest = CRC32.digest();
        digest.update(&[t as u8]);
        digest.update(fragment);
        let crc = mask_crc(digest.finalize());

        let mut header = [0u8; HEADER_SIZE];
        encode_fixed32(&mut header[..4], crc);
        header[4] = (fragment.len() & 0xff) as u8;
        header[5] = (fragment.len() >> 8) as u8;
        header[6] = t as u8;

        self.dest.append(&header)?;
        self.dest.append(fragment)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + fragment.len();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()
    }

    /// Durably persists everything appended so far.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }
}
