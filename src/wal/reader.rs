use crate::env::SequentialFile;
use crate::util::coding::decode_fixed32;
use crate::wal::{unmask_crc, RecordType, BLOCK_SIZE, CRC32, HEADER_SIZE};

/// Receives reports of bytes dropped due to corruption. Replay decides
/// whether a report is fatal (`paranoid_checks`) or merely logged.
pub trait Reporter: Send {
    fn corruption(&mut self, bytes: usize, reason: &str);
}

/// Outcome of reading one physical record.
enum Physical {
    Record {
        record_type: u8,
        data: Vec<u8>,
        offset: u64,
    },
    /// Clean or mid-record end of file.
    Eof,
    /// A record was skipped: corruption, zero padding, or a record before
    /// the initial offset.
    Bad,
}

/// Reassembles logical records from a log file, tolerating torn tails and
/// reporting corrupt regions without giving up on the rest of the file.
pub struct Reader {
    file: Box<dyn SequentialFile>,
    reporter: Option<Box<dyn Reporter>>,
    verify_checksums: bool,

    backing: Vec<u8>,
    buffer_start: usize,
    buffer_end: usize,
    eof: bool,

    /// Offset of the first location past the end of the buffer.
    end_of_buffer_offset: u64,
    /// Offset of the last record returned by `read_record`.
    last_record_offset: u64,
    /// Skip everything that lives before this physical offset.
    initial_offset: u64,
    /// True while skipping leading `Middle`/`Last` fragments after an
    /// initial-offset seek.
    resyncing: bool,
}

impl Reader {
    pub fn new(
        file: Box<dyn SequentialFile>,
        reporter: Option<Box<dyn Reporter>>,
        verify_checksums: bool,
        initial_offset: u64,
    ) -> Self {
        Reader {
            file,
            reporter,
            verify_checksums,
            backing: vec![0; BLOCK_SIZE],
            buffer_start: 0,
            buffer_end: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Offset of the last record returned.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    fn buffer_len(&self) -> usize {
        self.buffer_end - self.buffer_start
    }

    fn report_corruption(&mut self, bytes: u64, reason: &str) {
        if bytes == 0 {
            return;
        }
        if let Some(reporter) = self.reporter.as_deref_mut() {
            reporter.corruption(bytes as usize, reason);
        }
    }

    /// Positions the file at the block containing `initial_offset`.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;

        // An offset inside the block's trailer belongs to the next block.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start;
        if block_start > 0 {
            if let Err(e) = self.file.skip(block_start) {
                self.report_corruption(block_start, &e.to_string());
                return false;
            }
        }
        true
    }

    /// Returns the next logical record, or `None` at end of file.
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return None;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled.
        let mut prospective_offset = 0u64;

        loop {
            let physical = self.read_physical_record();

            if self.resyncing {
                match &physical {
                    Physical::Record { record_type, .. }
                        if *record_type == RecordType::Middle as u8 =>
                    {
                        continue;
                    }
                    Physical::Record { record_type, .. }
                        if *record_type == RecordType::Last as u8 =>
                    {
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            match physical {
                Physical::Record {
                    record_type,
                    data,
                    offset,
                } => {
                    if record_type == RecordType::Full as u8 {
                        if in_fragmented_record {
                            self.report_corruption(
                                scratch.len() as u64,
                                "partial record without end(1)",
                            );
                        }
                        self.last_record_offset = offset;
                        return Some(data);
                    } else if record_type == RecordType::First as u8 {
                        if in_fragmented_record {
                            self.report_corruption(
                                scratch.len() as u64,
                                "partial record without end(2)",
                            );
                        }
                        prospective_offset = offset;
                        scratch = data;
                        in_fragmented_record = true;
                    } else if record_type == RecordType::Middle as u8 {
                        if !in_fragmented_record {
                            self.report_corruption(
                                data.len() as u64,
                                "missing start of fragmented record(1)",
                            );
                        } else {
                            scratch.extend_from_slice(&data);
                        }
                    } else if record_type == RecordType::Last as u8 {
                        if !in_fragmented_record {
                            self.report_corruption(
                                data.len() as u64,
                                "missing start of fragmented record(2)",
                            );
                        } else {
                            scratch.extend_from_slice(&data);
                            self.last_record_offset = prospective_offset;
                            return Some(scratch);
                        }
                    } else {
                        let dropped = data.len()
                            + if in_fragmented_record {
                                scratch.len()
                            } else {
                                0
                            };
                        self.report_corruption(
                            dropped as u64,
                            &format!("unknown record type {record_type}"),
                        );
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
                Physical::Eof => {
                    // A fragmented record cut off by EOF means the writer
                    // died mid-record; the partial data was never
                    // acknowledged, so drop it silently.
                    return None;
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(
                            scratch.len() as u64,
                            "error in middle of record",
                        );
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
            }
        }
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.buffer_len() < HEADER_SIZE {
                if !self.eof {
                    // Last block exhausted (any tail shorter than a header
                    // is padding); fetch the next one.
                    self.buffer_start = 0;
                    self.buffer_end = 0;
                    match self.file.read(&mut self.backing) {
                        Ok(n) => {
                            self.end_of_buffer_offset += n as u64;
                            self.buffer_end = n;
                            if n < BLOCK_SIZE {
                                self.eof = true;
                            }
                        }
                        Err(e) => {
                            self.report_corruption(BLOCK_SIZE as u64, &e.to_string());
                            self.eof = true;
                            return Physical::Eof;
                        }
                    }
                    continue;
                } else {
                    // Truncated header at file end: the writer died mid
                    // header write. Not an acknowledged record, no report.
                    self.buffer_start = self.buffer_end;
                    return Physical::Eof;
                }
            }

            let header = &self.backing[self.buffer_start..self.buffer_start + HEADER_SIZE];
            let length = header[4] as usize | ((header[5] as usize) << 8);
            let record_type = header[6];
            let expected_crc = unmask_crc(decode_fixed32(&header[..4]));

            if HEADER_SIZE + length > self.buffer_len() {
                let drop_size = self.buffer_len() as u64;
                self.buffer_start = self.buffer_end;
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return Physical::Bad;
                }
                // Length field points past EOF: assume a torn tail write.
                return Physical::Eof;
            }

            if record_type == RecordType::Zero as u8 && length == 0 {
                // Zero-filled padding region; skip the rest of this buffer
                // without reporting.
                self.buffer_start = self.buffer_end;
                return Physical::Bad;
            }

            if self.verify_checksums {
                let mut digest = CRC32.digest();
                digest.update(
                    &self.backing
                        [self.buffer_start + HEADER_SIZE - 1..self.buffer_start + HEADER_SIZE + length],
                );
                if digest.finalize() != expected_crc {
                    let drop_size = self.buffer_len() as u64;
                    self.buffer_start = self.buffer_end;
                    self.report_corruption(drop_size, "checksum mismatch");
                    return Physical::Bad;
                }
            }

            let data_start = self.buffer_start + HEADER_SIZE;
            let data = self.backing[data_start..data_start + length].to_vec();
            self.buffer_start += HEADER_SIZE + length;

            let offset = self.end_of_buffer_offset
                - self.buffer_len() as u64
                - HEADER_SIZE as u64
                - length as u64;

            // Skip physical records that start before the initial offset.
            if offset < self.initial_offset {
                return Physical::Bad;
            }

            // Unknown types flow through: read_record reports them with
            // fragment context.
            return Physical::Record {
                record_type,
                data,
                offset,
            };
        }
    }
}
