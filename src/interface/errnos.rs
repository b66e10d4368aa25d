// Error taxonomy surfaced to hosted programs through the sysio error slot

use thiserror::Error;

/// Closed set of errors a syscall can report.
///
/// `WouldBlock` is internal: channel operations may produce it, but the
/// blocking syscalls retry instead of handing it to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Errno {
    #[error("invalid file descriptor")]
    InvalidDescriptor,
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation would block")]
    WouldBlock,
    #[error("operation not supported")]
    Unsupported,
    #[error("unexpected failure")]
    Generic,
}

/// Backend failures reported by a virtual filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    #[error("file already exists: {path}")]
    AlreadyExists { path: String },
}

impl From<VfsError> for Errno {
    fn from(err: VfsError) -> Errno {
        match err {
            VfsError::NotFound { .. } | VfsError::NotADirectory { .. } => Errno::NotFound,
            VfsError::PermissionDenied { .. }
            | VfsError::IsADirectory { .. }
            | VfsError::AlreadyExists { .. } => Errno::PermissionDenied,
        }
    }
}

/// Logs a failed syscall and hands back the errno to return.
///
/// Call sites read `return Err(syscall_error(Errno::NotFound, "open", "..."))`.
pub fn syscall_error(e: Errno, syscall: &str, message: &str) -> Errno {
    log::debug!("{}: {} ({})", syscall, message, e);
    e
}

pub type SyscallResult<T = ()> = Result<T, Errno>;
