//! On-disk framing shared by the table builder and reader: block handles,
//! the footer, and checksummed block IO.

use std::sync::Arc;

use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::util::coding::{decode_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::wal::{mask_crc, unmask_crc, CRC32};

/// Identifies the sorted-table format; the low bytes of a footer that does
/// not end in this value belong to some other file.
pub const TABLE_MAGIC: u64 = 0xdb4775248b80fb57;

/// Maximum encoded length of a [`BlockHandle`]: two varint64s.
pub const MAX_HANDLE_ENCODED_LENGTH: usize = 10 + 10;

/// `2 × BlockHandle::max + magic(8)`.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * MAX_HANDLE_ENCODED_LENGTH + 8;

/// `compression_type(1) ‖ masked crc32c(4)` after every block payload.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Block content codec tag. Only `None` is writable; the other tags are
/// recognized on disk so foreign files fail loudly rather than silently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Snappy,
    Zstd,
}

impl Compression {
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Snappy => 1,
            Compression::Zstd => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Snappy),
            2 => Ok(Compression::Zstd),
            other => Err(Error::Corruption(format!(
                "unknown block compression tag {other:#x}"
            ))),
        }
    }
}

/// Locates a block inside a table file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Decodes from the front of `src`, returning the handle and bytes
    /// consumed.
    pub fn decode_from(src: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n) = get_varint64(src)?;
        let (size, m) = get_varint64(&src[n..])?;
        Ok((BlockHandle { offset, size }, n + m))
    }
}

/// Fixed-length table trailer: metaindex handle, index handle, padding,
/// magic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(start + 2 * MAX_HANDLE_ENCODED_LENGTH, 0);
        put_fixed32(dst, (TABLE_MAGIC & 0xffff_ffff) as u32);
        put_fixed32(dst, (TABLE_MAGIC >> 32) as u32);
        debug_assert_eq!(dst.len(), start + FOOTER_ENCODED_LENGTH);
    }

    pub fn decode_from(src: &[u8]) -> Result<Footer> {
        if src.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("footer too short".to_string()));
        }
        let magic_offset = FOOTER_ENCODED_LENGTH - 8;
        let lo = decode_fixed32(&src[magic_offset..]) as u64;
        let hi = decode_fixed32(&src[magic_offset + 4..]) as u64;
        if (hi << 32) | lo != TABLE_MAGIC {
            return Err(Error::InvalidArgument(
                "not a sorted table (bad magic number)".to_string(),
            ));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(src)?;
        let (index_handle, _) = BlockHandle::decode_from(&src[n..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Appends `payload ‖ trailer` and returns the handle for it.
pub fn block_trailer(compression: Compression, payload: &[u8]) -> [u8; BLOCK_TRAILER_SIZE] {
    let mut digest = CRC32.digest();
    digest.update(payload);
    digest.update(&[compression.tag()]);
    let crc = mask_crc(digest.finalize());

    let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
    trailer[0] = compression.tag();
    let mut crc_bytes = Vec::with_capacity(4);
    put_fixed32(&mut crc_bytes, crc);
    trailer[1..].copy_from_slice(&crc_bytes);
    trailer
}

/// Reads a block's payload, verifying the trailer checksum when asked.
pub fn read_block_contents(
    file: &Arc<dyn RandomAccessFile>,
    verify_checksums: bool,
    handle: BlockHandle,
) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let data = file.read_at(handle.offset, n + BLOCK_TRAILER_SIZE)?;
    if data.len() != n + BLOCK_TRAILER_SIZE {
        return Err(Error::Corruption("truncated block read".to_string()));
    }

    let compression = Compression::from_tag(data[n])?;
    if verify_checksums {
        let stored = unmask_crc(decode_fixed32(&data[n + 1..]));
        let mut digest = CRC32.digest();
        digest.update(&data[..n + 1]);
        if digest.finalize() != stored {
            return Err(Error::Corruption("block checksum mismatch".to_string()));
        }
    }

    match compression {
        Compression::None => {
            let mut payload = data;
            payload.truncate(n);
            Ok(payload)
        }
        other => Err(Error::NotSupported(format!(
            "block compressed with unsupported codec {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip() {
        for (offset, size) in [(0u64, 0u64), (1, 2), (1 << 30, 1 << 20), (u64::MAX, 7)] {
            let handle = BlockHandle::new(offset, size);
            let mut buf = Vec::new();
            handle.encode_to(&mut buf);
            let (decoded, consumed) = BlockHandle::decode_from(&buf).unwrap();
            assert_eq!(decoded, handle);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let footer = Footer {
            metaindex_handle: BlockHandle::new(1234, 99),
            index_handle: BlockHandle::new(5678, 4321),
        };
        let mut buf = Vec::new();
        footer.encode_to(&mut buf);
        assert_eq!(buf.len(), FOOTER_ENCODED_LENGTH);
        let decoded = Footer::decode_from(&buf).unwrap();
        assert_eq!(decoded.metaindex_handle, footer.metaindex_handle);
        assert_eq!(decoded.index_handle, footer.index_handle);
    }

    #[test]
    fn test_footer_rejects_bad_magic() {
        let footer = Footer::default();
        let mut buf = Vec::new();
        footer.encode_to(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        assert!(matches!(
            Footer::decode_from(&buf),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_compression_tags() {
        for c in [Compression::None, Compression::Snappy, Compression::Zstd] {
            assert_eq!(Compression::from_tag(c.tag()).unwrap(), c);
        }
        assert!(Compression::from_tag(9).is_err());
    }
}
