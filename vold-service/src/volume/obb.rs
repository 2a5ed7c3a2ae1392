// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vold_contracts::{StorageError, StorageErrorKind};
use vold_sys::{fs_tools, loop_device};
use vold_types::Filesystem;

use super::{VolumeBase, VolumeHooks};
use crate::context::Context;

/// Permission mask of an OBB mount: owner rw, group read
const OBB_MASK: u32 = 0o227;

/// Loopback container image, optionally behind a crypto mapping
#[derive(Debug)]
pub struct ObbVolume {
    image: PathBuf,
    key: Option<Vec<u8>>,
    owner_gid: u32,
    loop_path: Option<PathBuf>,
    dm_path: Option<PathBuf>,
}

impl ObbVolume {
    pub(super) fn new(image: &Path, key: Option<Vec<u8>>, owner_gid: u32) -> Self {
        Self {
            image: image.to_path_buf(),
            key,
            owner_gid,
            loop_path: None,
            dm_path: None,
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Device the filesystem is mounted from
    fn source(&self) -> Option<&Path> {
        self.dm_path.as_deref().or(self.loop_path.as_deref())
    }
}

#[async_trait]
impl VolumeHooks for ObbVolume {
    async fn do_create(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let loop_path = loop_device::attach(ctx.commands(), &self.image).await?;
        tracing::debug!(volume = %base.id(), device = %loop_path.display(), "Attached image");

        if let Some(key) = &self.key {
            let crypto = &ctx.adapters.crypto;
            let mapped = if key.len() != crypto.key_size() {
                Err(StorageError::invalid_input(format!(
                    "key for {} is {} bytes, expected {}",
                    base.id(),
                    key.len(),
                    crypto.key_size()
                )))
            } else {
                crypto.setup(base.id(), &loop_path, key).await
            };

            match mapped {
                Ok(dm_path) => self.dm_path = Some(dm_path),
                Err(e) => {
                    if let Err(cleanup) = loop_device::detach(ctx.commands(), &loop_path).await {
                        tracing::warn!(device = %loop_path.display(), "Failed to detach loop device: {}", cleanup);
                    }
                    return Err(e);
                }
            }
        }

        self.loop_path = Some(loop_path);
        Ok(())
    }

    async fn do_destroy(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        if self.dm_path.take().is_some() {
            if let Err(e) = ctx.adapters.crypto.revert(base.id()).await {
                tracing::warn!(volume = %base.id(), "Failed to tear down crypto mapping: {}", e);
            }
        }
        match self.loop_path.take() {
            Some(loop_path) => loop_device::detach(ctx.commands(), &loop_path).await,
            None => Ok(()),
        }
    }

    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        if !ctx.supports(Filesystem::Vfat) {
            return Err(StorageError::new(
                StorageErrorKind::Unsupported,
                "vfat is not supported",
            ));
        }
        let source = self
            .source()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::internal(format!("{} has no backing device", base.id())))?;

        let path = ctx.config.paths.obb.join(base.id());
        base.set_path(ctx, &path)?;

        fs_tools::check(ctx.commands(), Filesystem::Vfat, &source).await?;

        let system = ctx.system();
        system.prepare_dir(&path, 0o700, 0, 0).await?;
        let request =
            fs_tools::portable_mount_request(Filesystem::Vfat, &source, &path, 0, self.owner_gid, OBB_MASK);
        if let Err(e) = system.mount(&request).await {
            if let Err(cleanup) = system.remove_dir(&path).await {
                tracing::warn!(path = %path.display(), "Failed to remove mount point: {}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn do_unmount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let Some(path) = base.path().map(PathBuf::from) else {
            return Ok(());
        };
        let system = ctx.system();
        let sleep = ctx.sleep_on_unmount();

        if let Err(e) = system.kill_processes_using_path(&path, sleep).await {
            tracing::warn!(path = %path.display(), "Failed to kill path holders: {}", e);
        }
        if let Err(e) = system.force_unmount(&path, sleep).await {
            tracing::warn!(path = %path.display(), "Failed to unmount: {}", e);
        }
        if let Err(e) = system.remove_dir(&path).await {
            tracing::warn!(path = %path.display(), "Failed to remove mount point: {}", e);
        }
        Ok(())
    }
}
