#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the byte-addressed [`ByteDevice`] trait with a file-backed
//! implementation, and the block-addressed [`BlockDevice`] trait that the
//! rest of the system talks to. Blocks are a fixed 512 bytes; every
//! transfer moves exactly one block. The byte layer speaks `std::io`;
//! errors gain block context when they cross into the block layer.

use flatfs_error::{Fatal, Result};
use flatfs_types::{BLOCK_SIZE, BLOCK_SIZE_U64, Dbn};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Owned block buffer.
///
/// Invariant: length == `BLOCK_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), BLOCK_SIZE);
        Self { bytes }
    }

    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0_u8; BLOCK_SIZE],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> io::Result<()>;
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open an existing backing image.
    ///
    /// Tries read-write first and falls back to read-only, so inspection
    /// tools keep working on write-protected images. A missing image is
    /// `Fatal::NoDisk`; anything else is `Fatal::DiskInit`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Fatal::NoDisk(path.display().to_string()).into());
        }

        let open = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map(|file| (file, false))
            });
        let (file, writable) = open.map_err(|source| Fatal::DiskInit {
            path: path.display().to_string(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| Fatal::DiskInit {
                path: path.display().to_string(),
                source,
            })?
            .len();

        debug!(path = %path.display(), len, writable, "opened backing image");
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    /// Create (or truncate) a backing image of exactly `len` bytes.
    ///
    /// The file is zero-filled via `set_len`, so a fresh image reads back
    /// as all-zero blocks.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let path = path.as_ref();
        let init = |source| Fatal::DiskInit {
            path: path.display().to_string(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(init)?;
        file.set_len(len).map_err(init)?;

        debug!(path = %path.display(), len, "created backing image");
        Ok(Self {
            file: Arc::new(file),
            len,
            writable: true,
        })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset
            .checked_add(u64::try_from(buf.len()).map_err(|_| range_error(offset, buf.len()))?)
            .ok_or_else(|| range_error(offset, buf.len()))?;
        if end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read out of bounds: offset={offset} len={} image_len={}",
                    buf.len(),
                    self.len
                ),
            ));
        }

        self.file.read_exact_at(buf, offset)
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "backing image opened read-only",
            ));
        }
        let end = offset
            .checked_add(u64::try_from(buf.len()).map_err(|_| range_error(offset, buf.len()))?)
            .ok_or_else(|| range_error(offset, buf.len()))?;
        if end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "write out of bounds: offset={offset} len={} image_len={}",
                    buf.len(),
                    self.len
                ),
            ));
        }

        self.file.write_all_at(buf, offset)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

fn range_error(offset: u64, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("transfer range overflows u64: offset={offset} len={len}"),
    )
}

/// Block-addressed I/O interface.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: Dbn) -> Result<BlockBuf>;

    /// Write a block by number. `data.len()` MUST equal `BLOCK_SIZE`.
    fn write_block(&self, block: Dbn, data: &[u8]) -> Result<()>;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Adapter exposing a [`ByteDevice`] block by block.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap a byte device, requiring a block-aligned image length.
    pub fn new(inner: D) -> Result<Self> {
        let len = inner.len_bytes();
        let remainder = len % BLOCK_SIZE_U64;
        if remainder != 0 {
            return Err(Fatal::Geometry(format!(
                "image length is not block-aligned: len_bytes={len} remainder={remainder}"
            ))
            .into());
        }
        Ok(Self {
            inner,
            block_count: len / BLOCK_SIZE_U64,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn check_in_range(&self, block: Dbn) -> Result<()> {
        if u64::from(block.0) >= self.block_count {
            return Err(Fatal::Corrupt {
                block: u64::from(block.0),
                detail: format!(
                    "block out of range: block_count={}",
                    self.block_count
                ),
            }
            .into());
        }
        Ok(())
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: Dbn) -> Result<BlockBuf> {
        self.check_in_range(block)?;
        let mut buf = BlockBuf::zeroed();
        self.inner
            .read_exact_at(block.to_byte_offset(), buf.as_mut_slice())
            .map_err(|source| Fatal::BlockIo {
                block: u64::from(block.0),
                source,
            })?;
        Ok(buf)
    }

    fn write_block(&self, block: Dbn, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE {
            return Err(Fatal::Geometry(format!(
                "write_block data size mismatch: got={} expected={BLOCK_SIZE}",
                data.len()
            ))
            .into());
        }
        self.check_in_range(block)?;
        self.inner
            .write_all_at(block.to_byte_offset(), data)
            .map_err(|source| Fatal::BlockIo {
                block: u64::from(block.0),
                source,
            })?;
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync().map_err(|source| {
            Fatal::BlockIo {
                block: 0,
                source,
            }
            .into()
        })
    }
}
