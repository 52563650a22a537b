use libc::{EINVAL, EIO, ENOENT, EOPNOTSUPP, EROFS};
use thiserror::Error;

/// Failure classes callers may need to tell apart.
///
/// These travel inside [`anyhow::Error`]; use [`Ext3Error::of`] to recover one.
#[derive(Debug, Error)]
pub enum Ext3Error {
    #[error("invalid superblock signature: {0:#06x}")]
    BadSignature(u16),

    #[error("invalid filesystem state: {0:#06x}")]
    BadState(u16),

    #[error("invalid error handling method: {0}")]
    BadErrorMethod(u16),

    /// The image uses extent-mapped files (an ext4 layout).
    #[error("filesystem uses extents, which this decoder does not support")]
    ExtentsUnsupported,

    /// Structurally invalid metadata found while decoding.
    #[error("corrupt filesystem: {0}")]
    Corrupt(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// The operation does not apply to this kind of file.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("read-only filesystem: {0} is not supported")]
    ReadOnly(&'static str),
}

impl Ext3Error {
    /// Find the [`Ext3Error`] carried by `err`, if any.
    pub fn of(err: &anyhow::Error) -> Option<&Ext3Error> {
        err.downcast_ref::<Ext3Error>()
    }

    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(Self::of(err), Some(Ext3Error::NotFound(_)))
    }

    /// The POSIX errno reported for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Ext3Error::BadSignature(_) | Ext3Error::BadState(_) | Ext3Error::BadErrorMethod(_) => {
                EINVAL
            }
            Ext3Error::ExtentsUnsupported => EOPNOTSUPP,
            Ext3Error::Corrupt(_) => EIO,
            Ext3Error::NotFound(_) => ENOENT,
            Ext3Error::InvalidArgument(_) => EINVAL,
            Ext3Error::ReadOnly(_) => EROFS,
        }
    }

    /// The errno for an arbitrary error: typed errors map through [`Self::errno`],
    /// everything else (I/O, short reads) is `EIO`.
    pub fn errno_of(err: &anyhow::Error) -> i32 {
        Self::of(err).map_or(EIO, Ext3Error::errno)
    }
}
