// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use async_trait::async_trait;

use crate::StorageError;

/// Parameters for launching the FUSE permission overlay over a backing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    pub source: PathBuf,
    /// Name of the per-view directory under each runtime root
    pub label: String,
    pub uid: u32,
    pub gid: u32,
    pub user_id: u32,
    /// Grant full write access (primary storage on a Visible volume)
    pub full_write: bool,
    pub multi_user: bool,
}

/// Running overlay instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayHandle {
    pub pid: Option<u32>,
}

#[async_trait]
pub trait OverlayLauncher: Send + Sync {
    async fn spawn(&self, request: &OverlayRequest) -> Result<OverlayHandle, StorageError>;

    /// Stop a previously spawned overlay. Missing processes are not an error.
    async fn stop(&self, handle: OverlayHandle) -> Result<(), StorageError>;
}
