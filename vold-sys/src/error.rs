// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use vold_contracts::{StorageError, StorageErrorKind};

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Unexpected output from {tool}: {line}")]
    Parse { tool: &'static str, line: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

impl From<SysError> for StorageError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Io(io) => io.into(),
            SysError::Errno(errno) => {
                let kind = match errno {
                    nix::Error::EBUSY => StorageErrorKind::Busy,
                    nix::Error::ENOENT | nix::Error::ENXIO => StorageErrorKind::NotFound,
                    nix::Error::EPERM | nix::Error::EACCES => StorageErrorKind::PermissionDenied,
                    nix::Error::ETIMEDOUT => StorageErrorKind::Timeout,
                    _ => StorageErrorKind::Internal,
                };
                StorageError::new(kind, errno.to_string())
            }
            SysError::PermissionDenied(msg) => {
                StorageError::new(StorageErrorKind::PermissionDenied, msg)
            }
            SysError::DeviceNotFound(msg) => StorageError::not_found(msg),
            SysError::Spawn { program, reason } => StorageError::new(
                StorageErrorKind::Unavailable,
                format!("Failed to run {program}: {reason}"),
            ),
            other => StorageError::internal(other.to_string()),
        }
    }
}
