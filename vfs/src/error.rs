use thiserror::Error;

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("no such entry")]
    NotFound,

    #[error("unexpected pathname: {0}")]
    UnexpectedPath(String),

    #[error("write offset overflow")]
    OffsetOverflow,

    #[error("operation not supported on a redirected file")]
    NotSupported,

    #[error("invalid seek")]
    InvalidSeek,

    #[error("no backing entry for open descriptor: {0}")]
    NoBacking(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl VfsError {
    /// The errno a handled failure surfaces as. Anything that is not an
    /// expected POSIX outcome collapses to EIO so the server sees a plain
    /// I/O failure instead of crashing.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound => libc::ENOENT,
            VfsError::NotSupported => libc::ENOSYS,
            VfsError::InvalidSeek => libc::EINVAL,
            VfsError::UnexpectedPath(_)
            | VfsError::OffsetOverflow
            | VfsError::NoBacking(_)
            | VfsError::Store(_) => libc::EIO,
        }
    }

    /// Expected POSIX outcomes are returned silently; the rest get logged at
    /// the boundary before errno is set.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            VfsError::NotFound | VfsError::NotSupported | VfsError::InvalidSeek
        )
    }
}

/// Sets the calling thread's errno.
pub(crate) fn set_errno(err: i32) {
    unsafe { *libc::__errno_location() = err }
}
