// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vold_types::{DeviceNumber, MountRequest};

use crate::StorageError;

/// Kernel and filesystem primitives used by volumes and disks
#[async_trait]
pub trait SystemOps: Send + Sync {
    async fn create_device_node(&self, path: &Path, device: DeviceNumber)
    -> Result<(), StorageError>;

    async fn destroy_device_node(&self, path: &Path) -> Result<(), StorageError>;

    /// Size in bytes of the block device at `path`
    async fn block_device_size(&self, path: &Path) -> Result<u64, StorageError>;

    /// Read a sysfs attribute, trimmed. `Ok(None)` when the attribute is absent.
    async fn read_sysfs_attr(&self, path: &Path) -> Result<Option<String>, StorageError>;

    /// Create `path` if needed and force its mode and ownership
    async fn prepare_dir(&self, path: &Path, mode: u32, uid: u32, gid: u32)
    -> Result<(), StorageError>;

    async fn remove_dir(&self, path: &Path) -> Result<(), StorageError>;

    async fn mount(&self, request: &MountRequest) -> Result<(), StorageError>;

    /// Detach `path`, escalating through kill signals while it stays busy.
    /// `sleep` controls whether the escalation waits between attempts.
    async fn force_unmount(&self, path: &Path, sleep: bool) -> Result<(), StorageError>;

    /// Kill processes with open files under `path`, returning how many were signalled
    async fn kill_processes_using_path(&self, path: &Path, sleep: bool)
    -> Result<usize, StorageError>;

    /// `st_dev` of the filesystem containing `path`
    async fn device_id(&self, path: &Path) -> Result<u64, StorageError>;

    /// Current mount points in mount-table order
    async fn mount_points(&self) -> Result<Vec<PathBuf>, StorageError>;

    /// Replace `link` with a symlink to `target`
    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), StorageError>;
}
