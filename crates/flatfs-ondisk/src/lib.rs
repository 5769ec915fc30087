#![forbid(unsafe_code)]
//! On-disk format for flatfs volumes.
//!
//! A volume is a flat array of 512-byte blocks laid out in four fixed
//! regions, derived once at format time and stored in the superblock:
//!
//! | region      | start        | contents                          |
//! |-------------|--------------|-----------------------------------|
//! | superblock  | block 0      | magic, version, region bounds     |
//! | inode table | `inode_start`| 64-byte inode records             |
//! | directory   | `dir_start`  | 32-byte name → inode entries      |
//! | free bitmap | `free_start` | one bit per block on the volume   |
//! | data        | `data_start` | file contents                     |
//!
//! All integers are little-endian. Everything in this crate is a pure
//! function over byte slices: decoding never touches a device, and all
//! failures are [`ParseError`]s for the caller to wrap with block context.

use flatfs_types::{
    BLOCK_SIZE, BLOCK_SIZE_U64, Dbn, Fbn, InodeNo, ParseError, blocks_for_bytes, ensure_slice,
    read_le_u16, read_le_u32, trim_nul_padded, u64_to_u32,
};
use serde::{Deserialize, Serialize};

// ── format constants ─────────────────────────────────────────────────────────

/// `"FLFS"` little-endian in the first four bytes of block 0.
pub const FLATFS_MAGIC: u32 = 0x5346_4C46;

/// Current format version. There is exactly one.
pub const FLATFS_VERSION: u32 = 1;

/// Encoded superblock length in bytes (the rest of block 0 is zero).
pub const SUPERBLOCK_LEN: usize = 48;

/// Size of one inode record on disk.
pub const INODE_SIZE: usize = 64;

/// Inode records per block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Direct block pointers per inode. There is no indirection, so this
/// bounds the file size.
pub const NUM_DIRECT: usize = 14;

/// Largest byte size a single file can reach: `NUM_DIRECT` full blocks.
pub const MAX_FILE_SIZE: u64 = NUM_DIRECT as u64 * BLOCK_SIZE_U64;

/// Size of one directory entry on disk.
pub const DIRENT_SIZE: usize = 32;

/// Directory entries per block.
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;

/// Width of the NUL-padded name field inside a directory entry.
pub const NAME_FIELD: usize = 28;

/// Longest permitted file name in bytes. One byte of the field is kept
/// for the NUL terminator so a maximal name still decodes unambiguously.
pub const MAX_NAME_LEN: usize = NAME_FIELD - 1;

/// Allocation bits per bitmap block.
pub const BITS_PER_BLOCK: u64 = BLOCK_SIZE_U64 * 8;

/// `DiskInode::flags` bit marking the record as allocated.
pub const INODE_IN_USE: u16 = 0x0001;

// ── geometry ─────────────────────────────────────────────────────────────────

/// Format-time sizing knobs. Everything else about the layout is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Total blocks on the volume, metadata included.
    pub total_blocks: u32,
    /// Number of inode records in the inode table.
    pub inode_count: u32,
    /// Number of directory entry slots.
    pub dir_capacity: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            total_blocks: 256,
            inode_count: 64,
            dir_capacity: 64,
        }
    }
}

impl Geometry {
    /// Smallest geometry whose data region holds at least `data_blocks`
    /// blocks. The bitmap covers every block including its own, so the
    /// total is grown until it accounts for itself.
    pub fn for_capacity(
        data_blocks: u32,
        inode_count: u32,
        dir_capacity: u32,
    ) -> Result<Self, ParseError> {
        if data_blocks == 0 {
            return Err(ParseError::InvalidField {
                field: "data_blocks",
                reason: "cannot be zero",
            });
        }
        let fixed = 1
            + blocks_for_bytes(u64::from(inode_count) * INODE_SIZE as u64)
            + blocks_for_bytes(u64::from(dir_capacity) * DIRENT_SIZE as u64)
            + u64::from(data_blocks);
        let mut total = fixed;
        loop {
            let grown = fixed + total.div_ceil(BITS_PER_BLOCK);
            if grown == total {
                break;
            }
            total = grown;
        }
        let geo = Self {
            total_blocks: u64_to_u32(total, "total_blocks")?,
            inode_count,
            dir_capacity,
        };
        // Surfaces zero inode_count / dir_capacity here rather than at format.
        SuperBlock::from_geometry(geo)?;
        Ok(geo)
    }
}

// ── superblock ───────────────────────────────────────────────────────────────

/// Decoded block 0. Region bounds are stored rather than recomputed on
/// every access; [`SuperBlock::validate`] proves they match the counts.
///
/// Encoded layout, all `u32` little-endian:
///
/// ```text
/// 0x00 magic        0x04 version      0x08 total_blocks  0x0c inode_count
/// 0x10 inode_start  0x14 inode_blocks 0x18 dir_capacity  0x1c dir_start
/// 0x20 dir_blocks   0x24 free_start   0x28 free_blocks   0x2c data_start
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub version: u32,
    pub total_blocks: u32,
    pub inode_count: u32,
    pub inode_start: u32,
    pub inode_blocks: u32,
    pub dir_capacity: u32,
    pub dir_start: u32,
    pub dir_blocks: u32,
    pub free_start: u32,
    pub free_blocks: u32,
    pub data_start: u32,
}

impl SuperBlock {
    /// Derive the full region layout from a [`Geometry`].
    ///
    /// The inode table starts at block 1 and the remaining regions are
    /// packed back to back. Fails if the counts are degenerate or the
    /// metadata leaves no room for data.
    pub fn from_geometry(geo: Geometry) -> Result<Self, ParseError> {
        if geo.inode_count == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_count",
                reason: "cannot be zero",
            });
        }
        if geo.dir_capacity == 0 {
            return Err(ParseError::InvalidField {
                field: "dir_capacity",
                reason: "cannot be zero",
            });
        }
        let inode_blocks = blocks_for_bytes(u64::from(geo.inode_count) * INODE_SIZE as u64);
        let dir_blocks = blocks_for_bytes(u64::from(geo.dir_capacity) * DIRENT_SIZE as u64);
        let free_blocks = u64::from(geo.total_blocks).div_ceil(BITS_PER_BLOCK);
        let inode_start = 1u64;
        let dir_start = inode_start + inode_blocks;
        let free_start = dir_start + dir_blocks;
        let data_start = free_start + free_blocks;
        if data_start >= u64::from(geo.total_blocks) {
            return Err(ParseError::InvalidField {
                field: "total_blocks",
                reason: "metadata regions leave no room for data",
            });
        }
        Ok(Self {
            version: FLATFS_VERSION,
            total_blocks: geo.total_blocks,
            inode_count: geo.inode_count,
            inode_start: u64_to_u32(inode_start, "inode_start")?,
            inode_blocks: u64_to_u32(inode_blocks, "inode_blocks")?,
            dir_capacity: geo.dir_capacity,
            dir_start: u64_to_u32(dir_start, "dir_start")?,
            dir_blocks: u64_to_u32(dir_blocks, "dir_blocks")?,
            free_start: u64_to_u32(free_start, "free_start")?,
            free_blocks: u64_to_u32(free_blocks, "free_blocks")?,
            data_start: u64_to_u32(data_start, "data_start")?,
        })
    }

    /// Decode block 0. The magic is checked before anything else so a
    /// foreign image fails with [`ParseError::InvalidMagic`], not a
    /// misleading field error.
    pub fn decode(block: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(block, 0x00)?;
        if magic != FLATFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(FLATFS_MAGIC),
                actual: u64::from(magic),
            });
        }
        let version = read_le_u32(block, 0x04)?;
        if version != FLATFS_VERSION {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "unsupported format version",
            });
        }
        Ok(Self {
            version,
            total_blocks: read_le_u32(block, 0x08)?,
            inode_count: read_le_u32(block, 0x0c)?,
            inode_start: read_le_u32(block, 0x10)?,
            inode_blocks: read_le_u32(block, 0x14)?,
            dir_capacity: read_le_u32(block, 0x18)?,
            dir_start: read_le_u32(block, 0x1c)?,
            dir_blocks: read_le_u32(block, 0x20)?,
            free_start: read_le_u32(block, 0x24)?,
            free_blocks: read_le_u32(block, 0x28)?,
            data_start: read_le_u32(block, 0x2c)?,
        })
    }

    /// Encode into the front of `block`; the caller supplies a zeroed
    /// block so the tail stays zero.
    pub fn encode_into(&self, block: &mut [u8]) -> Result<(), ParseError> {
        write_le_u32(block, 0x00, FLATFS_MAGIC)?;
        write_le_u32(block, 0x04, self.version)?;
        write_le_u32(block, 0x08, self.total_blocks)?;
        write_le_u32(block, 0x0c, self.inode_count)?;
        write_le_u32(block, 0x10, self.inode_start)?;
        write_le_u32(block, 0x14, self.inode_blocks)?;
        write_le_u32(block, 0x18, self.dir_capacity)?;
        write_le_u32(block, 0x1c, self.dir_start)?;
        write_le_u32(block, 0x20, self.dir_blocks)?;
        write_le_u32(block, 0x24, self.free_start)?;
        write_le_u32(block, 0x28, self.free_blocks)?;
        write_le_u32(block, 0x2c, self.data_start)?;
        Ok(())
    }

    /// Check a decoded superblock against the device it came from: the
    /// stored region bounds must equal the ones derived from its own
    /// counts, and the volume must fill the device exactly.
    pub fn validate(&self, device_blocks: u64) -> Result<(), ParseError> {
        let derived = Self::from_geometry(self.geometry())?;
        if *self != derived {
            return Err(ParseError::InvalidField {
                field: "layout",
                reason: "stored region bounds do not match derived layout",
            });
        }
        if u64::from(self.total_blocks) != device_blocks {
            return Err(ParseError::InvalidField {
                field: "total_blocks",
                reason: "superblock does not match device size",
            });
        }
        Ok(())
    }

    /// The sizing knobs this layout was derived from.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry {
            total_blocks: self.total_blocks,
            inode_count: self.inode_count,
            dir_capacity: self.dir_capacity,
        }
    }

    /// Blocks available for file contents.
    #[must_use]
    pub fn data_blocks(&self) -> u32 {
        self.total_blocks.saturating_sub(self.data_start)
    }

    /// Whether `dbn` lies in the data region.
    #[must_use]
    pub fn is_data_block(&self, dbn: Dbn) -> bool {
        dbn.0 >= self.data_start && dbn.0 < self.total_blocks
    }

    /// Block and in-block byte offset of inode record `inum`.
    pub fn inode_location(&self, inum: InodeNo) -> Result<(Dbn, usize), ParseError> {
        if inum.0 >= self.inode_count {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "beyond the inode table",
            });
        }
        let per_block = u64_to_u32(INODES_PER_BLOCK as u64, "inodes_per_block")?;
        let block = self
            .inode_start
            .checked_add(inum.0 / per_block)
            .ok_or(ParseError::IntegerConversion {
                field: "inode_block",
            })?;
        Ok((Dbn(block), inum.as_usize() % INODES_PER_BLOCK * INODE_SIZE))
    }

    /// Block and in-block byte offset of directory slot `slot`.
    pub fn dirent_location(&self, slot: u32) -> Result<(Dbn, usize), ParseError> {
        if slot >= self.dir_capacity {
            return Err(ParseError::InvalidField {
                field: "directory_slot",
                reason: "beyond directory capacity",
            });
        }
        let per_block = u64_to_u32(DIRENTS_PER_BLOCK as u64, "dirents_per_block")?;
        let block = self
            .dir_start
            .checked_add(slot / per_block)
            .ok_or(ParseError::IntegerConversion { field: "dir_block" })?;
        let offset = slot as usize % DIRENTS_PER_BLOCK * DIRENT_SIZE;
        Ok((Dbn(block), offset))
    }

    /// Bitmap block and bit position tracking allocation of `dbn`.
    pub fn bitmap_location(&self, dbn: Dbn) -> Result<(Dbn, u32), ParseError> {
        if dbn.0 >= self.total_blocks {
            return Err(ParseError::InvalidField {
                field: "block_number",
                reason: "beyond the volume",
            });
        }
        let bit = u64::from(dbn.0);
        let block = u64::from(self.free_start) + bit / BITS_PER_BLOCK;
        let in_block = u64_to_u32(bit % BITS_PER_BLOCK, "bitmap_bit")?;
        Ok((Dbn(u64_to_u32(block, "bitmap_block")?), in_block))
    }
}

// ── inode records ────────────────────────────────────────────────────────────

/// One 64-byte inode record.
///
/// ```text
/// 0x00 flags (u16)   0x02 reserved (u16, zero)   0x04 size (u32)
/// 0x08 direct[0..14] (u32 each)
/// ```
///
/// A direct slot of 0 means unallocated; block 0 is the superblock, so
/// no file block can legitimately live there. The table is dense: every
/// allocated slot precedes every zero slot, and together they back all
/// `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    pub flags: u16,
    pub size: u32,
    pub direct: [u32; NUM_DIRECT],
}

impl DiskInode {
    /// A free record, as written by format and by release.
    pub const EMPTY: Self = Self {
        flags: 0,
        size: 0,
        direct: [0; NUM_DIRECT],
    };

    /// A fresh zero-length file record.
    #[must_use]
    pub fn new_in_use() -> Self {
        Self {
            flags: INODE_IN_USE,
            ..Self::EMPTY
        }
    }

    pub fn decode(record: &[u8]) -> Result<Self, ParseError> {
        let flags = read_le_u16(record, 0x00)?;
        let size = read_le_u32(record, 0x04)?;
        let mut direct = [0u32; NUM_DIRECT];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_le_u32(record, 0x08 + i * 4)?;
        }
        Ok(Self {
            flags,
            size,
            direct,
        })
    }

    pub fn encode_into(&self, record: &mut [u8]) -> Result<(), ParseError> {
        write_le_u16(record, 0x00, self.flags)?;
        write_le_u16(record, 0x02, 0)?;
        write_le_u32(record, 0x04, self.size)?;
        for (i, dbn) in self.direct.iter().enumerate() {
            write_le_u32(record, 0x08 + i * 4, *dbn)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.flags & INODE_IN_USE != 0
    }

    /// Number of allocated direct slots (the dense prefix).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // at most NUM_DIRECT
    pub fn allocated_blocks(&self) -> u32 {
        self.direct.iter().take_while(|dbn| **dbn != 0).count() as u32
    }

    /// Data block backing file block `fbn`, if allocated.
    #[must_use]
    pub fn block_at(&self, fbn: Fbn) -> Option<Dbn> {
        self.direct
            .get(fbn.as_usize())
            .copied()
            .filter(|dbn| *dbn != 0)
            .map(Dbn)
    }

    /// Record `dbn` as the backing block for file block `fbn`.
    pub fn set_block(&mut self, fbn: Fbn, dbn: Dbn) -> Result<(), ParseError> {
        let slot = self
            .direct
            .get_mut(fbn.as_usize())
            .ok_or(ParseError::InvalidField {
                field: "direct",
                reason: "file block beyond the direct table",
            })?;
        *slot = dbn.0;
        Ok(())
    }

    /// All allocated data blocks, in file order.
    pub fn blocks(&self) -> impl Iterator<Item = Dbn> + '_ {
        self.direct
            .iter()
            .take_while(|dbn| **dbn != 0)
            .map(|dbn| Dbn(*dbn))
    }

    /// Structural checks on a decoded record: the direct table must be a
    /// dense prefix of data-region blocks backing every byte of `size`,
    /// and a free record must be fully zero.
    pub fn validate(&self, sb: &SuperBlock) -> Result<(), ParseError> {
        let allocated = self.allocated_blocks() as usize;
        if self.direct[allocated..].iter().any(|dbn| *dbn != 0) {
            return Err(ParseError::InvalidField {
                field: "direct",
                reason: "hole in the direct block table",
            });
        }
        if !self.is_in_use() {
            if self.size != 0 || allocated != 0 {
                return Err(ParseError::InvalidField {
                    field: "flags",
                    reason: "free inode has residual data",
                });
            }
            return Ok(());
        }
        if blocks_for_bytes(u64::from(self.size)) > allocated as u64 {
            return Err(ParseError::InvalidField {
                field: "size",
                reason: "size exceeds the allocated blocks",
            });
        }
        for dbn in self.blocks() {
            if !sb.is_data_block(dbn) {
                return Err(ParseError::InvalidField {
                    field: "direct",
                    reason: "points outside the data region",
                });
            }
        }
        Ok(())
    }
}

// ── directory entries ────────────────────────────────────────────────────────

/// One name → inode binding from the directory region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub inum: InodeNo,
}

/// Decode one 32-byte directory slot. A leading NUL marks the slot free
/// and decodes to `None`.
pub fn decode_dirent(slot: &[u8]) -> Result<Option<DirEntry>, ParseError> {
    let name_bytes = ensure_slice(slot, 0, NAME_FIELD)?;
    if name_bytes[0] == 0 {
        return Ok(None);
    }
    let inum = read_le_u32(slot, NAME_FIELD)?;
    Ok(Some(DirEntry {
        name: trim_nul_padded(name_bytes),
        inum: InodeNo(inum),
    }))
}

/// Encode a name → inode binding into a 32-byte directory slot.
///
/// Name policy (which names are allowed) lives with the directory logic;
/// this only refuses names the field physically cannot hold.
pub fn encode_dirent(slot: &mut [u8], name: &str, inum: InodeNo) -> Result<(), ParseError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "cannot be empty",
        });
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "does not fit the name field",
        });
    }
    if bytes.contains(&0) {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "contains a NUL byte",
        });
    }
    let actual = slot.len();
    let dst = slot
        .get_mut(..DIRENT_SIZE)
        .ok_or(ParseError::InsufficientData {
            needed: DIRENT_SIZE,
            offset: 0,
            actual,
        })?;
    dst[..NAME_FIELD].fill(0);
    dst[..bytes.len()].copy_from_slice(bytes);
    write_le_u32(dst, NAME_FIELD, inum.0)
}

/// Mark a directory slot free.
pub fn clear_dirent(slot: &mut [u8]) -> Result<(), ParseError> {
    let actual = slot.len();
    let dst = slot
        .get_mut(..DIRENT_SIZE)
        .ok_or(ParseError::InsufficientData {
            needed: DIRENT_SIZE,
            offset: 0,
            actual,
        })?;
    dst.fill(0);
    Ok(())
}

// ── write helpers ────────────────────────────────────────────────────────────

fn write_le_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    let end = offset
        .checked_add(2)
        .ok_or(ParseError::IntegerConversion { field: "offset" })?;
    let actual = buf.len();
    let dst = buf
        .get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: 2,
            offset,
            actual,
        })?;
    dst.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn write_le_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let end = offset
        .checked_add(4)
        .ok_or(ParseError::IntegerConversion { field: "offset" })?;
    let actual = buf.len();
    let dst = buf
        .get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: 4,
            offset,
            actual,
        })?;
    dst.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn default_sb() -> SuperBlock {
        SuperBlock::from_geometry(Geometry::default()).expect("default geometry")
    }

    #[test]
    fn default_layout_is_packed() {
        let sb = default_sb();
        assert_eq!(sb.inode_start, 1);
        // 64 inodes * 64 bytes = 8 blocks.
        assert_eq!(sb.inode_blocks, 8);
        assert_eq!(sb.dir_start, 9);
        // 64 dirents * 32 bytes = 4 blocks.
        assert_eq!(sb.dir_blocks, 4);
        assert_eq!(sb.free_start, 13);
        // 256 bits fit in one bitmap block.
        assert_eq!(sb.free_blocks, 1);
        assert_eq!(sb.data_start, 14);
        assert_eq!(sb.data_blocks(), 242);
    }

    #[test]
    fn superblock_round_trip() {
        let sb = default_sb();
        let mut block = vec![0u8; BLOCK_SIZE];
        sb.encode_into(&mut block).expect("encode");
        let decoded = SuperBlock::decode(&block).expect("decode");
        assert_eq!(decoded, sb);
        assert!(block[SUPERBLOCK_LEN..].iter().all(|b| *b == 0));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut block = vec![0u8; BLOCK_SIZE];
        default_sb().encode_into(&mut block).expect("encode");
        block[0] ^= 0xff;
        let err = SuperBlock::decode(&block).expect_err("must reject");
        assert!(matches!(err, ParseError::InvalidMagic { .. }));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut block = vec![0u8; BLOCK_SIZE];
        default_sb().encode_into(&mut block).expect("encode");
        block[4] = 9;
        let err = SuperBlock::decode(&block).expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "version",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_tampered_bounds() {
        let mut sb = default_sb();
        sb.dir_start += 1;
        let err = sb
            .validate(u64::from(sb.total_blocks))
            .expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField { field: "layout", .. }
        ));
    }

    #[test]
    fn validate_rejects_device_size_mismatch() {
        let sb = default_sb();
        let err = sb
            .validate(u64::from(sb.total_blocks) + 1)
            .expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "total_blocks",
                ..
            }
        ));
    }

    #[test]
    fn from_geometry_rejects_metadata_only_volume() {
        let geo = Geometry {
            total_blocks: 14,
            inode_count: 64,
            dir_capacity: 64,
        };
        assert!(SuperBlock::from_geometry(geo).is_err());
    }

    #[test]
    fn for_capacity_yields_exact_data_region() {
        for data_blocks in [1u32, 16, 242, 5000] {
            let geo = Geometry::for_capacity(data_blocks, 64, 64).expect("geometry");
            let sb = SuperBlock::from_geometry(geo).expect("layout");
            assert_eq!(sb.data_blocks(), data_blocks, "data_blocks={data_blocks}");
        }
    }

    #[test]
    fn for_capacity_accounts_for_bitmap_growth() {
        // Enough data to need a second bitmap block.
        let geo = Geometry::for_capacity(8192, 64, 64).expect("geometry");
        let sb = SuperBlock::from_geometry(geo).expect("layout");
        assert!(sb.free_blocks >= 2);
        assert_eq!(sb.data_blocks(), 8192);
    }

    #[test]
    fn inode_location_walks_the_table() {
        let sb = default_sb();
        assert_eq!(
            sb.inode_location(InodeNo(0)).expect("inum 0"),
            (Dbn(1), 0)
        );
        assert_eq!(
            sb.inode_location(InodeNo(7)).expect("inum 7"),
            (Dbn(1), 448)
        );
        assert_eq!(
            sb.inode_location(InodeNo(8)).expect("inum 8"),
            (Dbn(2), 0)
        );
        assert!(sb.inode_location(InodeNo(64)).is_err());
    }

    #[test]
    fn dirent_location_walks_the_directory() {
        let sb = default_sb();
        assert_eq!(sb.dirent_location(0).expect("slot 0"), (Dbn(9), 0));
        assert_eq!(sb.dirent_location(15).expect("slot 15"), (Dbn(9), 480));
        assert_eq!(sb.dirent_location(16).expect("slot 16"), (Dbn(10), 0));
        assert!(sb.dirent_location(64).is_err());
    }

    #[test]
    fn bitmap_location_maps_bits() {
        let sb = default_sb();
        assert_eq!(sb.bitmap_location(Dbn(0)).expect("bit 0"), (Dbn(13), 0));
        assert_eq!(
            sb.bitmap_location(Dbn(255)).expect("bit 255"),
            (Dbn(13), 255)
        );
        assert!(sb.bitmap_location(Dbn(256)).is_err());
    }

    #[test]
    fn inode_round_trip() {
        let mut ino = DiskInode::new_in_use();
        ino.size = 1000;
        ino.set_block(Fbn(0), Dbn(14)).expect("slot 0");
        ino.set_block(Fbn(1), Dbn(20)).expect("slot 1");
        let mut record = [0u8; INODE_SIZE];
        ino.encode_into(&mut record).expect("encode");
        let decoded = DiskInode::decode(&record).expect("decode");
        assert_eq!(decoded, ino);
        assert_eq!(decoded.allocated_blocks(), 2);
        assert_eq!(decoded.block_at(Fbn(1)), Some(Dbn(20)));
        assert_eq!(decoded.block_at(Fbn(2)), None);
        assert_eq!(decoded.block_at(Fbn(99)), None);
    }

    #[test]
    fn inode_validate_rejects_sparse_direct_table() {
        let sb = default_sb();
        let mut ino = DiskInode::new_in_use();
        ino.set_block(Fbn(1), Dbn(20)).expect("slot 1");
        let err = ino.validate(&sb).expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField { field: "direct", .. }
        ));
    }

    #[test]
    fn inode_validate_rejects_unbacked_size() {
        let sb = default_sb();
        let mut ino = DiskInode::new_in_use();
        ino.size = 513;
        ino.set_block(Fbn(0), Dbn(14)).expect("slot 0");
        let err = ino.validate(&sb).expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField { field: "size", .. }
        ));
    }

    #[test]
    fn inode_validate_rejects_metadata_pointer() {
        let sb = default_sb();
        let mut ino = DiskInode::new_in_use();
        // Points at the inode table, not the data region.
        ino.set_block(Fbn(0), Dbn(2)).expect("slot 0");
        let err = ino.validate(&sb).expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField { field: "direct", .. }
        ));
    }

    #[test]
    fn inode_validate_rejects_dirty_free_record() {
        let sb = default_sb();
        let mut ino = DiskInode::EMPTY;
        ino.size = 4;
        let err = ino.validate(&sb).expect_err("must reject");
        assert!(matches!(
            err,
            ParseError::InvalidField { field: "flags", .. }
        ));
    }

    #[test]
    fn inode_validate_accepts_full_file() {
        let sb = default_sb();
        let mut ino = DiskInode::new_in_use();
        for i in 0..NUM_DIRECT {
            ino.set_block(Fbn(i as u32), Dbn(14 + i as u32)).expect("slot");
        }
        ino.size = u32::try_from(MAX_FILE_SIZE).expect("fits u32");
        ino.validate(&sb).expect("dense full file");
        assert_eq!(ino.blocks().count(), NUM_DIRECT);
    }

    #[test]
    fn dirent_round_trip() {
        let mut slot = [0u8; DIRENT_SIZE];
        encode_dirent(&mut slot, "report.txt", InodeNo(3)).expect("encode");
        let entry = decode_dirent(&slot).expect("decode").expect("occupied");
        assert_eq!(entry.name, "report.txt");
        assert_eq!(entry.inum, InodeNo(3));
    }

    #[test]
    fn dirent_overwrite_drops_old_name_tail() {
        let mut slot = [0u8; DIRENT_SIZE];
        encode_dirent(&mut slot, "a-much-longer-name.bin", InodeNo(1)).expect("first");
        encode_dirent(&mut slot, "b", InodeNo(2)).expect("second");
        let entry = decode_dirent(&slot).expect("decode").expect("occupied");
        assert_eq!(entry.name, "b");
        assert_eq!(entry.inum, InodeNo(2));
    }

    #[test]
    fn free_slot_decodes_to_none() {
        let slot = [0u8; DIRENT_SIZE];
        assert_eq!(decode_dirent(&slot).expect("decode"), None);
    }

    #[test]
    fn clear_dirent_frees_the_slot() {
        let mut slot = [0u8; DIRENT_SIZE];
        encode_dirent(&mut slot, "gone", InodeNo(5)).expect("encode");
        clear_dirent(&mut slot).expect("clear");
        assert_eq!(decode_dirent(&slot).expect("decode"), None);
    }

    #[test]
    fn encode_dirent_enforces_name_limits() {
        let mut slot = [0u8; DIRENT_SIZE];
        let max = "n".repeat(MAX_NAME_LEN);
        encode_dirent(&mut slot, &max, InodeNo(1)).expect("27 bytes fit");
        let entry = decode_dirent(&slot).expect("decode").expect("occupied");
        assert_eq!(entry.name, max);

        let too_long = "n".repeat(MAX_NAME_LEN + 1);
        assert!(encode_dirent(&mut slot, &too_long, InodeNo(1)).is_err());
        assert!(encode_dirent(&mut slot, "", InodeNo(1)).is_err());
        assert!(encode_dirent(&mut slot, "nul\0name", InodeNo(1)).is_err());
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(SuperBlock::decode(&[0u8; 8]).is_err());
        assert!(DiskInode::decode(&[0u8; 16]).is_err());
        assert!(decode_dirent(&[0u8; 8]).is_err());
        let mut short = [0u8; 8];
        assert!(default_sb().encode_into(&mut short).is_err());
        assert!(clear_dirent(&mut short).is_err());
    }
}
