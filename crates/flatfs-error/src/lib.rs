#![forbid(unsafe_code)]
//! Error types for flatfs.
//!
//! # Error Taxonomy
//!
//! flatfs uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `flatfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `FsError` | `flatfs-error` (this crate) | User-facing errors for the API and CLI |
//!
//! The runtime type itself has two tiers, reflecting what a caller can do
//! about the failure:
//!
//! | Tier | Meaning | Caller response |
//! |------|---------|-----------------|
//! | [`Recoverable`] | Bad argument or exhausted resource; the volume is intact | Report and continue |
//! | [`Fatal`] | The backing image is missing, unreadable, or corrupt | Unmount; nothing sensible can follow |
//!
//! ## Mapping Policy: ParseError → FsError
//!
//! `flatfs-error` is intentionally independent of `flatfs-types` and
//! `flatfs-ondisk` to avoid cyclic dependencies. The conversion from
//! `ParseError` to `FsError` is implemented in `flatfs-core`, which depends
//! on both crates. Parse failures on live metadata become
//! `Fatal::Corrupt { block, detail }`; parse failures during mount-time
//! superblock validation become `Fatal::Geometry` with a descriptive
//! message.
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`FsError::to_errno`].
//! The mapping is exhaustive (no wildcard arms) so adding a new variant is a
//! compile error until its errno is assigned.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `NotFound` | `ENOENT` |
//! | `BadCursor`, `BadWhence`, `InvalidName`, `BadBlockIndex` | `EINVAL` |
//! | `BadDescriptor`, `StaleDescriptor` | `EBADF` |
//! | `NoSpace`, `InodeTableFull`, `DirectoryFull` | `ENOSPC` |
//! | `TooManyOpenFiles` | `EMFILE` |
//! | `NameTooLong` | `ENAMETOOLONG` |
//! | `FileTooBig` | `EFBIG` |
//! | `DiskInit`, `BlockIo`, `Corrupt` | `EIO` |
//! | `NoDisk` | `ENODEV` |
//! | `Geometry` | `EINVAL` |

use thiserror::Error;

/// Unified error type for all flatfs operations.
///
/// Internal crate-specific errors (e.g. `ParseError` from `flatfs-types`)
/// are converted into `FsError` at crate boundaries. The two tiers keep
/// "your call was wrong" strictly separate from "the volume is gone".
#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Recoverable(#[from] Recoverable),

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

/// Per-operation failures that leave the volume fully usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Recoverable {
    /// No directory entry with the given name.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A seek would place the cursor before byte 0.
    #[error("cursor out of range: {0}")]
    BadCursor(i64),

    /// Unrecognized seek origin (valid raw values are 0, 1, 2).
    #[error("invalid whence: {0}")]
    BadWhence(i32),

    /// The descriptor was never issued or has been closed.
    #[error("unknown file descriptor: {0}")]
    BadDescriptor(u32),

    /// The descriptor's file was deleted or overwritten while open.
    #[error("descriptor {0} refers to a deleted file")]
    StaleDescriptor(u32),

    /// No free data blocks left on the volume.
    #[error("no space left on volume")]
    NoSpace,

    /// Every inode slot is in use.
    #[error("inode table full")]
    InodeTableFull,

    /// Every directory slot is in use.
    #[error("directory full")]
    DirectoryFull,

    /// The open file table has no free entry for a new file.
    #[error("too many open files")]
    TooManyOpenFiles,

    /// Filename exceeds the fixed on-disk name field.
    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// Filename is empty or contains a forbidden byte.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The write would exceed the per-file direct-block capacity.
    #[error("file too big: {requested} bytes (max {max})")]
    FileTooBig { requested: u64, max: u64 },

    /// A file block index beyond one-past-the-end was requested.
    ///
    /// The block resolver only extends files by exactly one block at a
    /// time; anything further means the caller's offset math is broken.
    #[error("file block {fbn} out of range ({allocated} blocks allocated)")]
    BadBlockIndex { fbn: u32, allocated: u32 },
}

/// Environment failures after which the session should be abandoned.
#[derive(Debug, Error)]
pub enum Fatal {
    /// The backing image could not be created or sized at format time.
    #[error("cannot initialize backing image {path}: {source}")]
    DiskInit {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No backing image exists at the given path.
    #[error("no backing image at {0}")]
    NoDisk(String),

    /// A physical block transfer failed.
    #[error("I/O failure at block {block}: {source}")]
    BlockIo {
        block: u64,
        #[source]
        source: std::io::Error,
    },

    /// On-disk metadata is structurally invalid at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corrupt { block: u64, detail: String },

    /// Volume geometry is invalid, inconsistent, or does not fit the image.
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

impl FsError {
    /// True if the session should be abandoned.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive: every variant has an explicit arm, so a
    /// new variant will not compile until it is mapped here.
    ///
    /// Policy notes:
    /// - `BlockIo` forwards the OS errno when one exists, else `EIO`.
    /// - `NoDisk` → `ENODEV`: the device is absent, not merely a bad path
    ///   argument.
    /// - The three exhaustion variants all map to `ENOSPC`; descriptor
    ///   exhaustion is the per-process `EMFILE` instead.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Recoverable(e) => e.to_errno(),
            Self::Fatal(e) => e.to_errno(),
        }
    }
}

impl Recoverable {
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::BadCursor(_)
            | Self::BadWhence(_)
            | Self::InvalidName(_)
            | Self::BadBlockIndex { .. } => libc::EINVAL,
            Self::BadDescriptor(_) | Self::StaleDescriptor(_) => libc::EBADF,
            Self::NoSpace | Self::InodeTableFull | Self::DirectoryFull => libc::ENOSPC,
            Self::TooManyOpenFiles => libc::EMFILE,
            Self::NameTooLong { .. } => libc::ENAMETOOLONG,
            Self::FileTooBig { .. } => libc::EFBIG,
        }
    }
}

impl Fatal {
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::BlockIo { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::DiskInit { .. } | Self::Corrupt { .. } => libc::EIO,
            Self::NoDisk(_) => libc::ENODEV,
            Self::Geometry(_) => libc::EINVAL,
        }
    }
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
