#![forbid(unsafe_code)]
//! Free-block accounting.
//!
//! One bit per block, packed LSB-first into the bitmap region described
//! by the superblock: bit `n` tracks block `n`. Format marks every
//! metadata block used, so a scan can only ever find free bits in the
//! data region. Allocation returns the lowest-numbered free block,
//! which keeps placement deterministic and freshly-freed space eligible
//! for immediate reuse.

use flatfs_block::{BlockBuf, BlockDevice};
use flatfs_error::{Fatal, Recoverable, Result};
use flatfs_ondisk::{BITS_PER_BLOCK, SuperBlock};
use flatfs_types::Dbn;

// ── bitmap bit operations ────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice. Out-of-range reads as used,
/// so a scan can never invent free space beyond the slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    match bitmap.get((idx / 8) as usize) {
        Some(byte) => (*byte >> (idx % 8)) & 1 == 1,
        None => true,
    }
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    if let Some(byte) = bitmap.get_mut((idx / 8) as usize) {
        *byte |= 1 << (idx % 8);
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    if let Some(byte) = bitmap.get_mut((idx / 8) as usize) {
        *byte &= !(1 << (idx % 8));
    }
}

/// Count free (zero) bits among the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    let full_bytes = (count / 8) as usize;
    let mut free: u32 = bitmap
        .iter()
        .take(full_bytes)
        .map(|byte| byte.count_zeros())
        .sum();
    for idx in count - count % 8..count {
        if !bitmap_get(bitmap, idx) {
            free += 1;
        }
    }
    free
}

/// First free (zero) bit among the first `count` bits of `bitmap`.
/// Whole bytes of set bits are skipped without testing each position.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32) -> Option<u32> {
    let full_bytes = (count / 8) as usize;
    for (i, byte) in bitmap.iter().take(full_bytes).enumerate() {
        if *byte != 0xff {
            #[expect(clippy::cast_possible_truncation)] // i is below count / 8
            let base = (i * 8) as u32;
            return Some(base + byte.trailing_ones());
        }
    }
    (count - count % 8..count).find(|&idx| !bitmap_get(bitmap, idx))
}

// ── free-block pool ──────────────────────────────────────────────────────────

/// Write a fresh bitmap: metadata blocks used, the data region free.
pub fn init_bitmap(dev: &dyn BlockDevice, sb: &SuperBlock) -> Result<()> {
    for k in 0..sb.free_blocks {
        let first = u64::from(k) * BITS_PER_BLOCK;
        #[expect(clippy::cast_possible_truncation)] // clamped to BITS_PER_BLOCK
        let used = u64::from(sb.data_start)
            .saturating_sub(first)
            .min(BITS_PER_BLOCK) as u32;
        let mut buf = BlockBuf::zeroed();
        for bit in 0..used {
            bitmap_set(buf.as_mut_slice(), bit);
        }
        dev.write_block(Dbn(sb.free_start + k), buf.as_slice())?;
    }
    Ok(())
}

/// Allocate the lowest-numbered free block and mark it used.
///
/// Returns [`Recoverable::NoSpace`] when the data region is full.
pub fn allocate_block(dev: &dyn BlockDevice, sb: &SuperBlock) -> Result<Dbn> {
    for k in 0..sb.free_blocks {
        let bitmap_dbn = Dbn(sb.free_start + k);
        let mut buf = dev.read_block(bitmap_dbn)?;
        let Some(bit) = bitmap_find_free(buf.as_slice(), bits_in_block(sb, k)) else {
            continue;
        };
        let dbn = block_for_bit(sb, k, bit)?;
        if !sb.is_data_block(dbn) {
            // Format reserves every metadata bit, so a free bit below
            // data_start means the bitmap itself is damaged.
            return Err(Fatal::Corrupt {
                block: u64::from(bitmap_dbn.0),
                detail: format!("free bit for metadata block {dbn}"),
            }
            .into());
        }
        bitmap_set(buf.as_mut_slice(), bit);
        dev.write_block(bitmap_dbn, buf.as_slice())?;
        return Ok(dbn);
    }
    Err(Recoverable::NoSpace.into())
}

/// Return `dbn` to the free pool.
///
/// Freeing a metadata block or a block that is already free is treated
/// as corruption, not silently absorbed.
pub fn release_block(dev: &dyn BlockDevice, sb: &SuperBlock, dbn: Dbn) -> Result<()> {
    if !sb.is_data_block(dbn) {
        return Err(Fatal::Corrupt {
            block: u64::from(dbn.0),
            detail: "refusing to free a metadata block".into(),
        }
        .into());
    }
    let (bitmap_dbn, bit) = locate(sb, dbn)?;
    let mut buf = dev.read_block(bitmap_dbn)?;
    if !bitmap_get(buf.as_slice(), bit) {
        return Err(Fatal::Corrupt {
            block: u64::from(dbn.0),
            detail: "double-free: block already free in bitmap".into(),
        }
        .into());
    }
    bitmap_clear(buf.as_mut_slice(), bit);
    dev.write_block(bitmap_dbn, buf.as_slice())
}

/// Free blocks remaining, by scanning the whole bitmap.
pub fn count_free_blocks(dev: &dyn BlockDevice, sb: &SuperBlock) -> Result<u64> {
    let mut free = 0u64;
    for k in 0..sb.free_blocks {
        let buf = dev.read_block(Dbn(sb.free_start + k))?;
        free += u64::from(bitmap_count_free(buf.as_slice(), bits_in_block(sb, k)));
    }
    Ok(free)
}

/// Whether `dbn` is marked used in the bitmap.
pub fn is_allocated(dev: &dyn BlockDevice, sb: &SuperBlock, dbn: Dbn) -> Result<bool> {
    let (bitmap_dbn, bit) = locate(sb, dbn)?;
    let buf = dev.read_block(bitmap_dbn)?;
    Ok(bitmap_get(buf.as_slice(), bit))
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Valid bits in bitmap block `k`; the last block may track fewer.
#[expect(clippy::cast_possible_truncation)] // clamped to BITS_PER_BLOCK
fn bits_in_block(sb: &SuperBlock, k: u32) -> u32 {
    let first = u64::from(k) * BITS_PER_BLOCK;
    u64::from(sb.total_blocks)
        .saturating_sub(first)
        .min(BITS_PER_BLOCK) as u32
}

fn block_for_bit(sb: &SuperBlock, k: u32, bit: u32) -> Result<Dbn> {
    let dbn = u64::from(k) * BITS_PER_BLOCK + u64::from(bit);
    if dbn >= u64::from(sb.total_blocks) {
        return Err(Fatal::Corrupt {
            block: dbn,
            detail: "free bit beyond the volume".into(),
        }
        .into());
    }
    #[expect(clippy::cast_possible_truncation)] // checked against total_blocks
    let dbn = dbn as u32;
    Ok(Dbn(dbn))
}

fn locate(sb: &SuperBlock, dbn: Dbn) -> Result<(Dbn, u32)> {
    sb.bitmap_location(dbn).map_err(|err| {
        Fatal::Corrupt {
            block: u64::from(dbn.0),
            detail: err.to_string(),
        }
        .into()
    })
}

// ── tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flatfs_error::FsError;
    use flatfs_ondisk::Geometry;
    use flatfs_types::BLOCK_SIZE;
    use parking_lot::Mutex;

    struct MemBlockDevice {
        blocks: Mutex<Vec<Vec<u8>>>,
    }

    impl MemBlockDevice {
        fn new(count: u32) -> Self {
            Self {
                blocks: Mutex::new(vec![vec![0u8; BLOCK_SIZE]; count as usize]),
            }
        }
    }

    impl BlockDevice for MemBlockDevice {
        fn read_block(&self, dbn: Dbn) -> Result<BlockBuf> {
            Ok(BlockBuf::new(self.blocks.lock()[dbn.as_usize()].clone()))
        }

        fn write_block(&self, dbn: Dbn, data: &[u8]) -> Result<()> {
            self.blocks.lock()[dbn.as_usize()].copy_from_slice(data);
            Ok(())
        }

        fn block_count(&self) -> u64 {
            self.blocks.lock().len() as u64
        }

        fn sync(&self) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (MemBlockDevice, SuperBlock) {
        let sb = SuperBlock::from_geometry(Geometry::default()).expect("layout");
        let dev = MemBlockDevice::new(sb.total_blocks);
        init_bitmap(&dev, &sb).expect("init");
        (dev, sb)
    }

    #[test]
    fn bitmap_bit_round_trip() {
        let mut bm = vec![0u8; 4];
        assert!(!bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0);
        assert!(bitmap_get(&bm, 0));
        bitmap_clear(&mut bm, 0);
        assert!(!bitmap_get(&bm, 0));

        bitmap_set(&mut bm, 7);
        assert_eq!(bm[0], 0x80);
        bitmap_set(&mut bm, 8);
        assert_eq!(bm[1], 0x01);

        // Out of range: reads as used, writes are dropped.
        assert!(bitmap_get(&bm, 999));
        bitmap_set(&mut bm, 999);
        bitmap_clear(&mut bm, 999);
    }

    #[test]
    fn count_free_honors_partial_tail() {
        let mut bm = vec![0u8; 2];
        bitmap_set(&mut bm, 3);
        bitmap_set(&mut bm, 9);
        bitmap_set(&mut bm, 12);
        // Bits 0..13 with three set: 10 free. Bit 12 is inside the
        // partial tail, bits 13..16 are beyond the bound.
        assert_eq!(bitmap_count_free(&bm, 13), 10);
        assert_eq!(bitmap_count_free(&bm, 16), 13);
    }

    #[test]
    fn find_free_skips_full_bytes() {
        let mut bm = vec![0u8; 2];
        for idx in 0..8 {
            bitmap_set(&mut bm, idx);
        }
        assert_eq!(bitmap_find_free(&bm, 16), Some(8));

        for idx in 8..16 {
            bitmap_set(&mut bm, idx);
        }
        assert_eq!(bitmap_find_free(&bm, 16), None);
    }

    #[test]
    fn find_free_respects_count_bound() {
        let bm = vec![0xffu8, 0x0f];
        // Bits 12..16 are free but only 0..12 are in bounds.
        assert_eq!(bitmap_find_free(&bm, 12), None);
        assert_eq!(bitmap_find_free(&bm, 16), Some(12));
    }

    #[test]
    fn init_marks_exactly_the_metadata() {
        let (dev, sb) = setup();
        assert_eq!(
            count_free_blocks(&dev, &sb).expect("count"),
            u64::from(sb.data_blocks())
        );
        assert!(is_allocated(&dev, &sb, Dbn(0)).expect("superblock"));
        assert!(is_allocated(&dev, &sb, Dbn(sb.data_start - 1)).expect("last metadata"));
        assert!(!is_allocated(&dev, &sb, Dbn(sb.data_start)).expect("first data"));
    }

    #[test]
    fn allocation_is_lowest_first() {
        let (dev, sb) = setup();
        let a = allocate_block(&dev, &sb).expect("first");
        let b = allocate_block(&dev, &sb).expect("second");
        let c = allocate_block(&dev, &sb).expect("third");
        assert_eq!(a, Dbn(sb.data_start));
        assert_eq!(b, Dbn(sb.data_start + 1));
        assert_eq!(c, Dbn(sb.data_start + 2));
    }

    #[test]
    fn released_block_is_reused_first() {
        let (dev, sb) = setup();
        let a = allocate_block(&dev, &sb).expect("first");
        let _b = allocate_block(&dev, &sb).expect("second");
        release_block(&dev, &sb, a).expect("release");
        assert_eq!(allocate_block(&dev, &sb).expect("reuse"), a);
    }

    #[test]
    fn exhaustion_returns_no_space() {
        let geo = Geometry::for_capacity(2, 8, 8).expect("geometry");
        let sb = SuperBlock::from_geometry(geo).expect("layout");
        let dev = MemBlockDevice::new(sb.total_blocks);
        init_bitmap(&dev, &sb).expect("init");

        let a = allocate_block(&dev, &sb).expect("first");
        let _b = allocate_block(&dev, &sb).expect("second");
        let err = allocate_block(&dev, &sb).expect_err("pool is empty");
        assert!(matches!(
            err,
            FsError::Recoverable(Recoverable::NoSpace)
        ));

        release_block(&dev, &sb, a).expect("release");
        assert_eq!(allocate_block(&dev, &sb).expect("after release"), a);
    }

    #[test]
    fn double_free_is_corruption() {
        let (dev, sb) = setup();
        let a = allocate_block(&dev, &sb).expect("alloc");
        release_block(&dev, &sb, a).expect("first free");
        let err = release_block(&dev, &sb, a).expect_err("second free");
        assert!(matches!(err, FsError::Fatal(Fatal::Corrupt { .. })));
    }

    #[test]
    fn freeing_metadata_is_corruption() {
        let (dev, sb) = setup();
        for dbn in [Dbn(0), Dbn(sb.inode_start), Dbn(sb.free_start)] {
            let err = release_block(&dev, &sb, dbn).expect_err("metadata");
            assert!(matches!(err, FsError::Fatal(Fatal::Corrupt { .. })));
        }
    }

    #[test]
    fn count_free_tracks_churn() {
        let (dev, sb) = setup();
        let full = u64::from(sb.data_blocks());
        let a = allocate_block(&dev, &sb).expect("alloc a");
        let b = allocate_block(&dev, &sb).expect("alloc b");
        assert_eq!(count_free_blocks(&dev, &sb).expect("count"), full - 2);
        release_block(&dev, &sb, a).expect("release a");
        assert_eq!(count_free_blocks(&dev, &sb).expect("count"), full - 1);
        release_block(&dev, &sb, b).expect("release b");
        assert_eq!(count_free_blocks(&dev, &sb).expect("count"), full);
    }
}
