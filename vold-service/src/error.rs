// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use vold_contracts::{StorageError, StorageErrorKind};
use zbus::fdo;

use crate::config::ConfigError;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("D-Bus error: {0}")]
    DBus(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ServiceError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            ServiceError::Storage(err) => err.kind,
            ServiceError::Config(_) => StorageErrorKind::InvalidInput,
            _ => StorageErrorKind::Internal,
        }
    }
}

impl From<ServiceError> for fdo::Error {
    fn from(err: ServiceError) -> Self {
        match err.kind() {
            StorageErrorKind::InvalidInput => fdo::Error::InvalidArgs(err.to_string()),
            StorageErrorKind::Unsupported => fdo::Error::NotSupported(err.to_string()),
            StorageErrorKind::PermissionDenied => fdo::Error::AccessDenied(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

impl From<zbus::Error> for ServiceError {
    fn from(err: zbus::Error) -> Self {
        ServiceError::DBus(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
