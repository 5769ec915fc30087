#![forbid(unsafe_code)]
//! flatfs public API facade.
//!
//! Re-exports the session layer from `flatfs-core` through a stable
//! external interface, together with the handful of foundation types
//! that appear in its signatures. This is the crate downstream
//! consumers depend on.

pub use flatfs_core::*;
pub use flatfs_error::{Fatal, FsError, Recoverable, Result};
pub use flatfs_ondisk::{Geometry, MAX_FILE_SIZE, MAX_NAME_LEN, NUM_DIRECT, SuperBlock};
pub use flatfs_types::{BLOCK_SIZE, Dbn, Fbn, Fd, InodeNo, Whence};
