// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use async_trait::async_trait;

use crate::StorageError;

/// One running process as seen by the per-uid remount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub uid: u32,
    /// Target of `/proc/<pid>/ns/mnt`
    pub mount_namespace: Option<String>,
    /// Target of `/proc/<pid>/exe`
    pub exe: Option<PathBuf>,
}

/// Mount steps applied inside a process's mount namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemountPlan {
    /// Runtime view bound onto `storage_target`; `None` leaves storage unmounted
    pub storage_source: Option<PathBuf>,
    pub storage_target: PathBuf,
    pub user_source: PathBuf,
    pub self_target: PathBuf,
}

#[async_trait]
pub trait ProcessTable: Send + Sync {
    async fn root_mount_namespace(&self) -> Result<String, StorageError>;

    async fn list_processes(&self) -> Result<Vec<ProcessEntry>, StorageError>;

    async fn remount_storage(&self, pid: i32, plan: &RemountPlan) -> Result<(), StorageError>;
}
