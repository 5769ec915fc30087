#![forbid(unsafe_code)]

use flatfs_alloc::{allocate_block, count_free_blocks, init_bitmap, release_block};
use flatfs_block::{BlockBuf, BlockDevice, ByteBlockDevice, FileByteDevice};
use flatfs_error::{Fatal, FsError, Recoverable, Result};
use flatfs_ondisk::{
    DIRENT_SIZE, DirEntry, DiskInode, Geometry, INODE_SIZE, MAX_FILE_SIZE, MAX_NAME_LEN,
    SuperBlock, clear_dirent, decode_dirent, encode_dirent,
};
use flatfs_types::{
    BLOCK_SIZE, BLOCK_SIZE_U64, Dbn, Fbn, Fd, InodeNo, ParseError, Whence, blocks_for_bytes,
    offset_in_block,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, trace};

/// Upper bound on simultaneously open files (distinct inodes, not
/// descriptors).
pub const MAX_OPEN_FILES: usize = 32;

// ── listing and statistics ───────────────────────────────────────────────────

/// One file as reported by [`FlatFs::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub inum: InodeNo,
    pub size: u64,
    /// Data blocks backing the file.
    pub blocks: u32,
}

/// Volume-wide counters as reported by [`FlatFs::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    pub total_blocks: u32,
    pub data_blocks: u32,
    pub free_blocks: u64,
    pub inode_count: u32,
    pub inodes_used: u32,
    pub dir_capacity: u32,
    pub entries_used: u32,
    pub open_files: u32,
    pub max_file_size: u64,
}

// ── open file table ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct OftEntry {
    inum: InodeNo,
    cursor: u64,
    refs: u32,
}

/// Open file table: one entry per open inode, shared by every
/// descriptor for that inode. Descriptors are handed out monotonically
/// and never reused within a session, so a closed descriptor stays
/// invalid instead of silently aliasing a later open.
#[derive(Debug)]
struct OpenFileTable {
    slots: Vec<Option<OftEntry>>,
    by_fd: HashMap<Fd, usize>,
    next_fd: u32,
}

impl OpenFileTable {
    fn new() -> Self {
        Self {
            slots: vec![None; MAX_OPEN_FILES],
            by_fd: HashMap::new(),
            // Descriptors start above the standard streams.
            next_fd: 3,
        }
    }

    /// Register one more descriptor for `inum`, joining the existing
    /// entry (and its cursor) when the inode is already open.
    fn open(&mut self, inum: InodeNo) -> std::result::Result<Fd, Recoverable> {
        if self.next_fd == u32::MAX {
            return Err(Recoverable::TooManyOpenFiles);
        }
        let slot = match self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|e| e.inum == inum))
        {
            Some(slot) => {
                if let Some(entry) = self.slots[slot].as_mut() {
                    entry.refs += 1;
                }
                slot
            }
            None => {
                let slot = self
                    .slots
                    .iter()
                    .position(Option::is_none)
                    .ok_or(Recoverable::TooManyOpenFiles)?;
                self.slots[slot] = Some(OftEntry {
                    inum,
                    cursor: 0,
                    refs: 1,
                });
                slot
            }
        };
        let fd = Fd(self.next_fd);
        self.next_fd += 1;
        self.by_fd.insert(fd, slot);
        Ok(fd)
    }

    fn get(&self, fd: Fd) -> Option<(InodeNo, u64)> {
        let slot = *self.by_fd.get(&fd)?;
        self.slots.get(slot)?.as_ref().map(|e| (e.inum, e.cursor))
    }

    fn set_cursor(&mut self, fd: Fd, cursor: u64) {
        if let Some(&slot) = self.by_fd.get(&fd) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.cursor = cursor;
            }
        }
    }

    /// Drop one descriptor; the entry is reclaimed when the last
    /// descriptor goes away.
    fn close(&mut self, fd: Fd) -> Option<InodeNo> {
        let slot = self.by_fd.remove(&fd)?;
        let entry = self.slots.get_mut(slot)?.as_mut()?;
        entry.refs -= 1;
        let inum = entry.inum;
        if entry.refs == 0 {
            self.slots[slot] = None;
        }
        Some(inum)
    }

    fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

// ── session ──────────────────────────────────────────────────────────────────

/// A mounted flatfs volume.
///
/// `FlatFs` owns the block device, the decoded superblock, and the open
/// file table, and exposes the whole operation surface: namespace ops
/// (`create`, `open`, `unlink`, `list`), descriptor ops (`read`,
/// `write`, `seek`, `tell`, `size`, `close`), and volume ops (`stats`,
/// `sync`).
///
/// Every error is a value: recoverable conditions (missing names, bad
/// descriptors, full volumes) come back as [`Recoverable`], and device
/// or image damage as [`Fatal`]. Nothing aborts.
///
/// ```ignore
/// let mut fs = FlatFs::format("vol.img", Geometry::default())?;
/// let fd = fs.create("notes.txt")?;
/// fs.write(fd, b"hello")?;
/// fs.seek(fd, 0, Whence::Set)?;
/// ```
pub struct FlatFs {
    dev: Box<dyn BlockDevice>,
    sb: SuperBlock,
    oft: OpenFileTable,
}

impl std::fmt::Debug for FlatFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatFs")
            .field("total_blocks", &self.sb.total_blocks)
            .field("data_start", &self.sb.data_start)
            .field("open_files", &self.oft.open_count())
            .finish()
    }
}

impl FlatFs {
    /// Create a fresh volume image at `path` and mount it.
    pub fn format(path: impl AsRef<Path>, geo: Geometry) -> Result<Self> {
        let sb = SuperBlock::from_geometry(geo).map_err(|e| Fatal::Geometry(e.to_string()))?;
        let file = FileByteDevice::create(
            path.as_ref(),
            u64::from(sb.total_blocks) * BLOCK_SIZE_U64,
        )?;
        let dev = ByteBlockDevice::new(file)?;
        let fs = Self::format_device(Box::new(dev), geo)?;
        info!(
            path = %path.as_ref().display(),
            total_blocks = sb.total_blocks,
            data_blocks = sb.data_blocks(),
            "formatted volume"
        );
        Ok(fs)
    }

    /// Write a fresh volume onto an existing device and mount it. The
    /// device must be exactly as large as the geometry calls for.
    pub fn format_device(dev: Box<dyn BlockDevice>, geo: Geometry) -> Result<Self> {
        let sb = SuperBlock::from_geometry(geo).map_err(|e| Fatal::Geometry(e.to_string()))?;
        if dev.block_count() != u64::from(sb.total_blocks) {
            return Err(Fatal::Geometry(format!(
                "device holds {} blocks, geometry needs {}",
                dev.block_count(),
                sb.total_blocks
            ))
            .into());
        }
        let mut block = BlockBuf::zeroed();
        sb.encode_into(block.as_mut_slice())
            .map_err(|e| corrupt_at(Dbn::SUPERBLOCK, &e))?;
        dev.write_block(Dbn::SUPERBLOCK, block.as_slice())?;
        let zero = BlockBuf::zeroed();
        for dbn in sb.inode_start..sb.free_start {
            dev.write_block(Dbn(dbn), zero.as_slice())?;
        }
        init_bitmap(dev.as_ref(), &sb)?;
        dev.sync()?;
        Ok(Self {
            dev,
            sb,
            oft: OpenFileTable::new(),
        })
    }

    /// Mount the volume image at `path`.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        let file = FileByteDevice::open(path.as_ref())?;
        let dev = ByteBlockDevice::new(file)?;
        let fs = Self::mount_device(Box::new(dev))?;
        info!(
            path = %path.as_ref().display(),
            total_blocks = fs.sb.total_blocks,
            inode_count = fs.sb.inode_count,
            dir_capacity = fs.sb.dir_capacity,
            "mounted volume"
        );
        Ok(fs)
    }

    /// Mount a volume from an already-opened device, validating the
    /// superblock against the device size.
    pub fn mount_device(dev: Box<dyn BlockDevice>) -> Result<Self> {
        let block = dev.read_block(Dbn::SUPERBLOCK)?;
        let sb = SuperBlock::decode(block.as_slice())
            .map_err(|e| corrupt_at(Dbn::SUPERBLOCK, &e))?;
        sb.validate(dev.block_count())
            .map_err(|e| corrupt_at(Dbn::SUPERBLOCK, &e))?;
        Ok(Self {
            dev,
            sb,
            oft: OpenFileTable::new(),
        })
    }

    /// The decoded superblock.
    #[must_use]
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    /// The sizing knobs this volume was formatted with.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.sb.geometry()
    }

    // ── namespace operations ─────────────────────────────────────────────

    /// Create an empty file named `name` and return a descriptor for it.
    ///
    /// If the name already exists its entry is rebound to a fresh inode
    /// and the old inode and all its blocks are released, so creating
    /// over an existing file truncates it. When the open file table
    /// cannot admit another file the creation itself still stands; only
    /// the descriptor is refused.
    pub fn create(&mut self, name: &str) -> Result<Fd> {
        validate_name(name)?;
        let inum = self.alloc_inode_slot()?;
        let old = match self.dir_insert(name, inum) {
            Ok(old) => old,
            Err(err) => {
                // Give the inode slot back; the directory is unchanged.
                self.write_inode(inum, &DiskInode::EMPTY)?;
                return Err(err);
            }
        };
        if let Some(old_inum) = old {
            self.release_inode(old_inum)?;
            debug!(name, %inum, %old_inum, "create replaced an existing file");
        } else {
            debug!(name, %inum, "create");
        }
        let fd = self.oft.open(inum)?;
        Ok(fd)
    }

    /// Open `name` and return a fresh descriptor for it.
    pub fn open(&mut self, name: &str) -> Result<Fd> {
        let Some((_, inum)) = self.dir_lookup(name)? else {
            return Err(Recoverable::NotFound(name.to_owned()).into());
        };
        let fd = self.oft.open(inum)?;
        debug!(name, %inum, fd = fd.0, "open");
        Ok(fd)
    }

    /// Remove `name` and release its inode and blocks. Descriptors
    /// still open on the file go stale.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let Some(inum) = self.dir_remove(name)? else {
            return Err(Recoverable::NotFound(name.to_owned()).into());
        };
        self.release_inode(inum)?;
        debug!(name, %inum, "unlink");
        Ok(())
    }

    /// Every directory entry, in directory slot order.
    pub fn list(&self) -> Result<Vec<FileInfo>> {
        let mut out = Vec::new();
        for (_, entry) in self.dir_entries()? {
            let ino = self.load_linked_inode(&entry)?;
            out.push(FileInfo {
                name: entry.name,
                inum: entry.inum,
                size: u64::from(ino.size),
                blocks: ino.allocated_blocks(),
            });
        }
        Ok(out)
    }

    /// Volume-wide usage counters.
    pub fn stats(&self) -> Result<FsStats> {
        let mut inodes_used = 0u32;
        for inum in 0..self.sb.inode_count {
            if self.read_inode(InodeNo(inum))?.is_in_use() {
                inodes_used += 1;
            }
        }
        let entries_used = u32::try_from(self.dir_entries()?.len())
            .map_err(|_| Fatal::Geometry("directory entry count overflows u32".to_owned()))?;
        #[expect(clippy::cast_possible_truncation)] // bounded by MAX_OPEN_FILES
        let open_files = self.oft.open_count() as u32;
        Ok(FsStats {
            total_blocks: self.sb.total_blocks,
            data_blocks: self.sb.data_blocks(),
            free_blocks: count_free_blocks(self.dev.as_ref(), &self.sb)?,
            inode_count: self.sb.inode_count,
            inodes_used,
            dir_capacity: self.sb.dir_capacity,
            entries_used,
            open_files,
            max_file_size: MAX_FILE_SIZE,
        })
    }

    /// Flush the device.
    pub fn sync(&mut self) -> Result<()> {
        self.dev.sync()
    }

    // ── descriptor operations ────────────────────────────────────────────

    /// Read from the shared cursor into `buf`, advancing the cursor.
    /// Returns the bytes read, clamped at end of file; a cursor at or
    /// past the end reads zero bytes.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let (inum, cursor) = self.descriptor(fd)?;
        let ino = self.open_inode(fd, inum)?;
        let avail = u64::from(ino.size).saturating_sub(cursor);
        let n = avail.min(buf.len() as u64);
        #[expect(clippy::cast_possible_truncation)] // bounded by buf.len()
        let n = n as usize;
        if n == 0 {
            trace!(fd = fd.0, %inum, cursor, "read at end of file");
            return Ok(0);
        }
        let inode_dbn = self.inode_block(inum)?;
        let mut done = 0usize;
        while done < n {
            let pos = cursor + done as u64;
            let fbn = fbn_at(pos);
            let off = offset_in_block(pos);
            let take = (BLOCK_SIZE - off).min(n - done);
            let dbn = ino.block_at(fbn).ok_or_else(|| Fatal::Corrupt {
                block: u64::from(inode_dbn.0),
                detail: format!("file block {fbn} inside the file size is unbacked"),
            })?;
            let blk = self.dev.read_block(dbn)?;
            buf[done..done + take].copy_from_slice(&blk.as_slice()[off..off + take]);
            done += take;
        }
        self.oft.set_cursor(fd, cursor + n as u64);
        trace!(fd = fd.0, %inum, n, "read");
        Ok(n)
    }

    /// Write `data` at the shared cursor, advancing it past the new
    /// bytes. Extends the file as needed; seeking past the end and
    /// writing backfills the gap with zeros.
    ///
    /// The write is all-or-nothing: capacity is checked up front, and a
    /// write that cannot complete changes neither the file nor the
    /// cursor.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        let (inum, cursor) = self.descriptor(fd)?;
        let mut ino = self.open_inode(fd, inum)?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = cursor.saturating_add(data.len() as u64);
        if end > MAX_FILE_SIZE {
            return Err(Recoverable::FileTooBig {
                requested: end,
                max: MAX_FILE_SIZE,
            }
            .into());
        }
        let size = u64::from(ino.size);
        let reach = end.max(size);
        let needed = blocks_for_bytes(reach).saturating_sub(u64::from(ino.allocated_blocks()));
        if needed > count_free_blocks(self.dev.as_ref(), &self.sb)? {
            return Err(Recoverable::NoSpace.into());
        }
        #[expect(clippy::cast_possible_truncation)] // reach is below MAX_FILE_SIZE
        let want_blocks = blocks_for_bytes(reach) as u32;
        for fbn in ino.allocated_blocks()..want_blocks {
            self.resolve_block(&mut ino, Fbn(fbn))?;
        }
        if cursor > size {
            // The bytes between the old end and the cursor become part
            // of the file and must read back as zeros.
            #[expect(clippy::cast_possible_truncation)] // gap is below MAX_FILE_SIZE
            let gap = vec![0u8; (cursor - size) as usize];
            self.copy_in(inum, &ino, size, &gap)?;
        }
        self.copy_in(inum, &ino, cursor, data)?;
        #[expect(clippy::cast_possible_truncation)] // reach is below MAX_FILE_SIZE
        {
            ino.size = reach as u32;
        }
        self.write_inode(inum, &ino)?;
        self.oft.set_cursor(fd, end);
        debug!(fd = fd.0, %inum, len = data.len(), cursor = end, "write");
        Ok(data.len())
    }

    /// Move the shared cursor. `Set` and `Cur` never touch the inode;
    /// `End` reads the current size first. A move that lands below
    /// zero is rejected and leaves the cursor where it was.
    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let (inum, cursor) = self.descriptor(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => {
                i64::try_from(cursor).map_err(|_| Recoverable::BadCursor(i64::MAX))?
            }
            Whence::End => {
                let ino = self.open_inode(fd, inum)?;
                i64::from(ino.size)
            }
        };
        let target = base
            .checked_add(offset)
            .ok_or(Recoverable::BadCursor(offset))?;
        let new = u64::try_from(target).map_err(|_| Recoverable::BadCursor(target))?;
        self.oft.set_cursor(fd, new);
        trace!(fd = fd.0, %inum, cursor = new, "seek");
        Ok(new)
    }

    /// [`FlatFs::seek`] for callers holding a raw whence value.
    pub fn seek_raw(&mut self, fd: Fd, offset: i64, whence: i32) -> Result<u64> {
        let whence = Whence::from_raw(whence).ok_or(Recoverable::BadWhence(whence))?;
        self.seek(fd, offset, whence)
    }

    /// The shared cursor position.
    pub fn tell(&self, fd: Fd) -> Result<u64> {
        let (_, cursor) = self.descriptor(fd)?;
        Ok(cursor)
    }

    /// Current size of the open file in bytes.
    pub fn size(&self, fd: Fd) -> Result<u64> {
        let (inum, _) = self.descriptor(fd)?;
        let ino = self.open_inode(fd, inum)?;
        Ok(u64::from(ino.size))
    }

    /// Drop a descriptor. Closing never touches the inode, so a stale
    /// descriptor can still be closed.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let inum = self
            .oft
            .close(fd)
            .ok_or(Recoverable::BadDescriptor(fd.0))?;
        debug!(fd = fd.0, %inum, "close");
        Ok(())
    }

    // ── inode table ──────────────────────────────────────────────────────

    fn inode_block(&self, inum: InodeNo) -> Result<Dbn> {
        let (dbn, _) = self
            .sb
            .inode_location(inum)
            .map_err(|e| corrupt_at(Dbn(self.sb.inode_start), &e))?;
        Ok(dbn)
    }

    fn read_inode(&self, inum: InodeNo) -> Result<DiskInode> {
        let (dbn, offset) = self
            .sb
            .inode_location(inum)
            .map_err(|e| corrupt_at(Dbn(self.sb.inode_start), &e))?;
        let buf = self.dev.read_block(dbn)?;
        let record = buf
            .as_slice()
            .get(offset..offset + INODE_SIZE)
            .ok_or_else(|| short_block(dbn))?;
        let ino = DiskInode::decode(record).map_err(|e| corrupt_at(dbn, &e))?;
        ino.validate(&self.sb).map_err(|e| corrupt_at(dbn, &e))?;
        Ok(ino)
    }

    fn write_inode(&mut self, inum: InodeNo, ino: &DiskInode) -> Result<()> {
        let (dbn, offset) = self
            .sb
            .inode_location(inum)
            .map_err(|e| corrupt_at(Dbn(self.sb.inode_start), &e))?;
        let mut buf = self.dev.read_block(dbn)?;
        let record = buf
            .as_mut_slice()
            .get_mut(offset..offset + INODE_SIZE)
            .ok_or_else(|| short_block(dbn))?;
        ino.encode_into(record).map_err(|e| corrupt_at(dbn, &e))?;
        self.dev.write_block(dbn, buf.as_slice())
    }

    /// Claim the lowest free inode record.
    fn alloc_inode_slot(&mut self) -> Result<InodeNo> {
        for raw in 0..self.sb.inode_count {
            let inum = InodeNo(raw);
            if !self.read_inode(inum)?.is_in_use() {
                self.write_inode(inum, &DiskInode::new_in_use())?;
                return Ok(inum);
            }
        }
        Err(Recoverable::InodeTableFull.into())
    }

    /// Free an inode record and every block it holds.
    fn release_inode(&mut self, inum: InodeNo) -> Result<()> {
        let ino = self.read_inode(inum)?;
        for dbn in ino.blocks() {
            release_block(self.dev.as_ref(), &self.sb, dbn)?;
        }
        self.write_inode(inum, &DiskInode::EMPTY)
    }

    /// Backing block for file block `fbn`, allocating it when `fbn` is
    /// exactly one past the allocated prefix. Anything further out is a
    /// [`Recoverable::BadBlockIndex`].
    fn resolve_block(&mut self, ino: &mut DiskInode, fbn: Fbn) -> Result<Dbn> {
        if let Some(dbn) = ino.block_at(fbn) {
            return Ok(dbn);
        }
        let allocated = ino.allocated_blocks();
        if fbn.0 > allocated {
            return Err(Recoverable::BadBlockIndex {
                fbn: fbn.0,
                allocated,
            }
            .into());
        }
        if u64::from(fbn.0) >= MAX_FILE_SIZE / BLOCK_SIZE_U64 {
            return Err(Recoverable::FileTooBig {
                requested: (u64::from(fbn.0) + 1) * BLOCK_SIZE_U64,
                max: MAX_FILE_SIZE,
            }
            .into());
        }
        let dbn = allocate_block(self.dev.as_ref(), &self.sb)?;
        ino.set_block(fbn, dbn).map_err(|e| corrupt_at(dbn, &e))?;
        trace!(%fbn, %dbn, "extended file by one block");
        Ok(dbn)
    }

    /// Copy `data` into the file's blocks starting at byte `at`. Every
    /// touched block must already be backed.
    fn copy_in(&mut self, inum: InodeNo, ino: &DiskInode, at: u64, data: &[u8]) -> Result<()> {
        let inode_dbn = self.inode_block(inum)?;
        let mut done = 0usize;
        while done < data.len() {
            let pos = at + done as u64;
            let fbn = fbn_at(pos);
            let off = offset_in_block(pos);
            let take = (BLOCK_SIZE - off).min(data.len() - done);
            let dbn = ino.block_at(fbn).ok_or_else(|| Fatal::Corrupt {
                block: u64::from(inode_dbn.0),
                detail: format!("file block {fbn} vanished mid-write"),
            })?;
            if take == BLOCK_SIZE {
                self.dev.write_block(dbn, &data[done..done + take])?;
            } else {
                let mut blk = self.dev.read_block(dbn)?;
                blk.as_mut_slice()[off..off + take].copy_from_slice(&data[done..done + take]);
                self.dev.write_block(dbn, blk.as_slice())?;
            }
            done += take;
        }
        Ok(())
    }

    // ── directory ────────────────────────────────────────────────────────

    fn dir_lookup(&self, name: &str) -> Result<Option<(u32, InodeNo)>> {
        for (slot, entry) in self.dir_entries()? {
            if entry.name == name {
                return Ok(Some((slot, entry.inum)));
            }
        }
        Ok(None)
    }

    /// Bind `name` to `inum`. Returns the previously bound inode when
    /// the name already existed.
    fn dir_insert(&mut self, name: &str, inum: InodeNo) -> Result<Option<InodeNo>> {
        let mut first_free = None;
        for blk in 0..self.sb.dir_blocks {
            let dbn = Dbn(self.sb.dir_start + blk);
            let buf = self.dev.read_block(dbn)?;
            for (pos, raw) in buf.as_slice().chunks_exact(DIRENT_SIZE).enumerate() {
                let Some(slot) = self.slot_index(blk, pos) else {
                    break;
                };
                match decode_dirent(raw).map_err(|e| corrupt_at(dbn, &e))? {
                    Some(entry) if entry.name == name => {
                        self.store_dirent(slot, name, inum)?;
                        return Ok(Some(entry.inum));
                    }
                    Some(_) => {}
                    None => {
                        if first_free.is_none() {
                            first_free = Some(slot);
                        }
                    }
                }
            }
        }
        let Some(slot) = first_free else {
            return Err(Recoverable::DirectoryFull.into());
        };
        self.store_dirent(slot, name, inum)?;
        Ok(None)
    }

    /// Unbind `name`, returning the inode it pointed at.
    fn dir_remove(&mut self, name: &str) -> Result<Option<InodeNo>> {
        let Some((slot, inum)) = self.dir_lookup(name)? else {
            return Ok(None);
        };
        let (dbn, offset) = self.dirent_location(slot)?;
        let mut buf = self.dev.read_block(dbn)?;
        let raw = buf
            .as_mut_slice()
            .get_mut(offset..offset + DIRENT_SIZE)
            .ok_or_else(|| short_block(dbn))?;
        clear_dirent(raw).map_err(|e| corrupt_at(dbn, &e))?;
        self.dev.write_block(dbn, buf.as_slice())?;
        Ok(Some(inum))
    }

    /// All occupied directory slots, in slot order.
    fn dir_entries(&self) -> Result<Vec<(u32, DirEntry)>> {
        let mut out = Vec::new();
        for blk in 0..self.sb.dir_blocks {
            let dbn = Dbn(self.sb.dir_start + blk);
            let buf = self.dev.read_block(dbn)?;
            for (pos, raw) in buf.as_slice().chunks_exact(DIRENT_SIZE).enumerate() {
                let Some(slot) = self.slot_index(blk, pos) else {
                    break;
                };
                if let Some(entry) = decode_dirent(raw).map_err(|e| corrupt_at(dbn, &e))? {
                    out.push((slot, entry));
                }
            }
        }
        Ok(out)
    }

    fn store_dirent(&mut self, slot: u32, name: &str, inum: InodeNo) -> Result<()> {
        let (dbn, offset) = self.dirent_location(slot)?;
        let mut buf = self.dev.read_block(dbn)?;
        let raw = buf
            .as_mut_slice()
            .get_mut(offset..offset + DIRENT_SIZE)
            .ok_or_else(|| short_block(dbn))?;
        encode_dirent(raw, name, inum).map_err(|e| corrupt_at(dbn, &e))?;
        self.dev.write_block(dbn, buf.as_slice())
    }

    fn dirent_location(&self, slot: u32) -> Result<(Dbn, usize)> {
        self.sb
            .dirent_location(slot)
            .map_err(|e| corrupt_at(Dbn(self.sb.dir_start), &e))
    }

    /// Directory slot index for entry `pos` of directory block `blk`,
    /// or `None` past the configured capacity.
    fn slot_index(&self, blk: u32, pos: usize) -> Option<u32> {
        #[expect(clippy::cast_possible_truncation)] // pos is below DIRENTS_PER_BLOCK
        let slot = blk * (BLOCK_SIZE / DIRENT_SIZE) as u32 + pos as u32;
        (slot < self.sb.dir_capacity).then_some(slot)
    }

    // ── descriptor plumbing ──────────────────────────────────────────────

    fn descriptor(&self, fd: Fd) -> Result<(InodeNo, u64)> {
        self.oft
            .get(fd)
            .ok_or_else(|| Recoverable::BadDescriptor(fd.0).into())
    }

    /// Load the inode behind an open descriptor; a freed inode slot
    /// means the file was unlinked after the open.
    fn open_inode(&self, fd: Fd, inum: InodeNo) -> Result<DiskInode> {
        let ino = self.read_inode(inum)?;
        if !ino.is_in_use() {
            return Err(Recoverable::StaleDescriptor(fd.0).into());
        }
        Ok(ino)
    }

    /// Load an inode reached through a directory entry; a free inode
    /// here means the directory and the table disagree.
    fn load_linked_inode(&self, entry: &DirEntry) -> Result<DiskInode> {
        let ino = self.read_inode(entry.inum)?;
        if !ino.is_in_use() {
            return Err(Fatal::Corrupt {
                block: u64::from(self.sb.dir_start),
                detail: format!("entry {:?} points at free inode {}", entry.name, entry.inum),
            }
            .into());
        }
        Ok(ino)
    }
}

// ── name policy ──────────────────────────────────────────────────────────────

/// Check a file name: 1 to 27 bytes of UTF-8 with no NUL and no `/`.
pub fn validate_name(name: &str) -> std::result::Result<(), Recoverable> {
    if name.is_empty() {
        return Err(Recoverable::InvalidName(name.to_owned()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Recoverable::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    if name.bytes().any(|b| b == 0 || b == b'/') {
        return Err(Recoverable::InvalidName(name.to_owned()));
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn corrupt_at(dbn: Dbn, err: &ParseError) -> FsError {
    Fatal::Corrupt {
        block: u64::from(dbn.0),
        detail: err.to_string(),
    }
    .into()
}

fn short_block(dbn: Dbn) -> FsError {
    Fatal::Corrupt {
        block: u64::from(dbn.0),
        detail: "block is shorter than the record it should hold".to_owned(),
    }
    .into()
}

#[expect(clippy::cast_possible_truncation)] // file offsets stay below MAX_FILE_SIZE
fn fbn_at(pos: u64) -> Fbn {
    Fbn((pos / BLOCK_SIZE_U64) as u32)
}

// ── tests ────────────────────────────────────────────────────────────────────
