#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed physical block size. Every transfer against the backing image is
/// exactly one block.
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_SIZE_U64: u64 = 512;

/// Disk block number: an absolute block index on the backing image.
///
/// This is a unit-carrying wrapper to prevent mixing disk-relative and
/// file-relative block indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dbn(pub u32);

/// File block number: the index of a block within one file (0 = the block
/// holding bytes 0..512).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fbn(pub u32);

/// Inode number: an index into the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNo(pub u32);

/// File descriptor handed out by `open`/`create`. Unique per call, never
/// reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fd(pub u32);

impl Dbn {
    /// Block 0 holds the superblock, so 0 never refers to a data block.
    /// Inode direct tables rely on this as the "unallocated" sentinel.
    pub const SUPERBLOCK: Self = Self(0);

    /// Byte offset of the start of this block on the backing image.
    ///
    /// Infallible: `u32::MAX * 512` fits comfortably in `u64`.
    #[must_use]
    pub fn to_byte_offset(self) -> u64 {
        u64::from(self.0) * BLOCK_SIZE_U64
    }

    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u32) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Fbn {
    /// File block containing the given byte offset.
    pub fn containing(offset: u64) -> Result<Self, ParseError> {
        u64_to_u32(offset / BLOCK_SIZE_U64, "file_block_number").map(Self)
    }

    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u32) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl InodeNo {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Offset of a byte offset within its block (always `< BLOCK_SIZE`).
#[must_use]
#[allow(clippy::cast_possible_truncation)] // remainder is < 512
pub fn offset_in_block(offset: u64) -> usize {
    (offset % BLOCK_SIZE_U64) as usize
}

/// Number of blocks needed to hold `bytes` bytes (ceiling division).
#[must_use]
pub fn blocks_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE_U64)
}

/// Seek origin for cursor repositioning.
///
/// Raw values mirror the conventional SEEK_SET/SEEK_CUR/SEEK_END encoding so
/// callers arriving from an integer interface can convert explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    /// Absolute: the offset becomes the cursor.
    Set,
    /// Relative to the current cursor.
    Cur,
    /// Relative to the file's current logical size.
    End,
}

impl Whence {
    /// Decode a raw whence integer; `None` for anything but 0, 1, 2.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Set),
            1 => Some(Self::Cur),
            2 => Some(Self::End),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Set => 0,
            Self::Cur => 1,
            Self::End => 2,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Narrow a `u64` to `usize` with an explicit error path.
///
/// On 64-bit platforms this is infallible; on 32-bit it can fail.
/// The `field` label is included in the error for diagnostics.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

/// Narrow a `u64` to `u32` with an explicit error path.
pub fn u64_to_u32(value: u64, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

impl fmt::Display for Dbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Fbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_helpers() {
        let bytes = [0x34_u8, 0x12, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0x1234);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_1234);
        assert_eq!(read_le_u32(&bytes, 4).expect("u32"), 0x90AB_CDEF);
    }

    #[test]
    fn test_ensure_slice_bounds() {
        let data = [0_u8; 8];
        assert!(ensure_slice(&data, 0, 8).is_ok());
        assert!(ensure_slice(&data, 4, 4).is_ok());
        assert_eq!(
            ensure_slice(&data, 4, 5).unwrap_err(),
            ParseError::InsufficientData {
                needed: 5,
                offset: 4,
                actual: 4,
            }
        );
        // Offset past the end reports zero available bytes.
        assert_eq!(
            ensure_slice(&data, 100, 1).unwrap_err(),
            ParseError::InsufficientData {
                needed: 1,
                offset: 100,
                actual: 0,
            }
        );
        // offset + len overflowing usize is rejected, not wrapped.
        assert!(ensure_slice(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_trim_nul_padded() {
        assert_eq!(trim_nul_padded(b"data.txt\0\0\0"), "data.txt");
        assert_eq!(trim_nul_padded(b"full-width-name"), "full-width-name");
        assert_eq!(trim_nul_padded(b"\0\0\0"), "");
    }

    #[test]
    fn test_block_byte_math() {
        assert_eq!(Dbn(0).to_byte_offset(), 0);
        assert_eq!(Dbn(1).to_byte_offset(), 512);
        assert_eq!(Dbn(7).to_byte_offset(), 3584);
        assert_eq!(Dbn(u32::MAX).to_byte_offset(), u64::from(u32::MAX) * 512);

        assert_eq!(offset_in_block(0), 0);
        assert_eq!(offset_in_block(511), 511);
        assert_eq!(offset_in_block(512), 0);
        assert_eq!(offset_in_block(1000), 488);
    }

    #[test]
    fn test_fbn_containing() {
        assert_eq!(Fbn::containing(0), Ok(Fbn(0)));
        assert_eq!(Fbn::containing(511), Ok(Fbn(0)));
        assert_eq!(Fbn::containing(512), Ok(Fbn(1)));
        assert_eq!(Fbn::containing(1000), Ok(Fbn(1)));
        assert_eq!(Fbn::containing(1024), Ok(Fbn(2)));
        // A byte offset too large for a u32 block index is an error, not a wrap.
        assert!(Fbn::containing(u64::MAX).is_err());
    }

    #[test]
    fn test_blocks_for_bytes() {
        assert_eq!(blocks_for_bytes(0), 0);
        assert_eq!(blocks_for_bytes(1), 1);
        assert_eq!(blocks_for_bytes(512), 1);
        assert_eq!(blocks_for_bytes(513), 2);
        assert_eq!(blocks_for_bytes(1000), 2);
        assert_eq!(blocks_for_bytes(7168), 14);
    }

    #[test]
    fn test_checked_ops() {
        assert_eq!(Dbn(10).checked_add(5), Some(Dbn(15)));
        assert_eq!(Dbn(u32::MAX).checked_add(1), None);
        assert_eq!(Fbn(13).checked_add(1), Some(Fbn(14)));
        assert_eq!(Fbn(u32::MAX).checked_add(1), None);
    }

    #[test]
    fn whence_raw_round_trip() {
        assert_eq!(Whence::from_raw(0), Some(Whence::Set));
        assert_eq!(Whence::from_raw(1), Some(Whence::Cur));
        assert_eq!(Whence::from_raw(2), Some(Whence::End));
        assert_eq!(Whence::from_raw(3), None);
        assert_eq!(Whence::from_raw(-1), None);
        for w in [Whence::Set, Whence::Cur, Whence::End] {
            assert_eq!(Whence::from_raw(w.to_raw()), Some(w));
        }
    }

    #[test]
    fn test_narrowing_helpers() {
        assert_eq!(u64_to_u32(0, "test"), Ok(0));
        assert_eq!(u64_to_u32(u64::from(u32::MAX), "test"), Ok(u32::MAX));
        assert!(u64_to_u32(u64::from(u32::MAX) + 1, "test").is_err());
        assert_eq!(u64_to_usize(42, "test"), Ok(42));
    }

    #[test]
    fn display_newtypes() {
        assert_eq!(Dbn(7).to_string(), "7");
        assert_eq!(Fbn(2).to_string(), "2");
        assert_eq!(InodeNo(3).to_string(), "3");
        assert_eq!(Fd(11).to_string(), "11");
    }
}
