// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vold_contracts::StorageError;
use vold_types::FsType;

use super::{VolumeBase, VolumeHooks};
use crate::context::Context;

/// Bookkeeping for a volume mounted by an external manager
#[derive(Debug, Clone)]
pub struct StubVolume {
    source: PathBuf,
    mount_path: PathBuf,
    fs_type: String,
    fs_uuid: String,
    fs_label: String,
}

impl StubVolume {
    pub fn new(
        source: &Path,
        mount_path: &Path,
        fs_type: &str,
        fs_uuid: &str,
        fs_label: &str,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            mount_path: mount_path.to_path_buf(),
            fs_type: fs_type.to_string(),
            fs_uuid: fs_uuid.to_string(),
            fs_label: fs_label.to_string(),
        }
    }
}

#[async_trait]
impl VolumeHooks for StubVolume {
    async fn do_create(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        base.set_fs_metadata(ctx, &self.fs_type, &self.fs_uuid, &self.fs_label);
        Ok(())
    }

    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        base.set_internal_path(ctx, &self.source)?;
        base.set_path(ctx, &self.mount_path)
    }

    async fn do_unmount(&mut self, _base: &mut VolumeBase, _ctx: &Context) -> Result<(), StorageError> {
        Ok(())
    }

    async fn do_format(
        &mut self,
        base: &mut VolumeBase,
        _ctx: &Context,
        fs_type: FsType,
    ) -> Result<(), StorageError> {
        tracing::debug!(volume = %base.id(), filesystem = %fs_type, "Stub format is handled externally");
        Ok(())
    }
}
