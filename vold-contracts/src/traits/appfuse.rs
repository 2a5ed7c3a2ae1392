// SPDX-License-Identifier: GPL-3.0-only

use std::os::fd::OwnedFd;

use async_trait::async_trait;

use crate::StorageError;

/// App-provided FUSE mounts, delegated to the platform bridge
#[async_trait]
pub trait AppFuseBridge: Send + Sync {
    async fn mount(&self, uid: u32, mount_id: u32) -> Result<OwnedFd, StorageError>;

    async fn unmount(&self, uid: u32, mount_id: u32) -> Result<(), StorageError>;

    async fn open_file(
        &self,
        uid: u32,
        mount_id: u32,
        file_id: u32,
        flags: i32,
    ) -> Result<OwnedFd, StorageError>;
}
