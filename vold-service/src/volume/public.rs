// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use async_trait::async_trait;
use vold_contracts::{OverlayRequest, StorageError, StorageErrorKind};
use vold_sys::{blkid, fs_tools};
use vold_types::{DeviceNumber, Filesystem, FsType};

use super::overlay::{self, OverlayViews, RunningOverlay};
use super::{VolumeBase, VolumeHooks};
use crate::context::Context;

/// Devices above this size default to exFAT when both portable filesystems are available
const EXFAT_THRESHOLD: u64 = 32 * 1024 * 1024 * 1024;

/// FAT permission mask for the raw mount: owner and group only
const RAW_MASK: u32 = 0o007;

/// Raw removable filesystem exposed through the permission overlay
#[derive(Debug)]
pub struct PublicVolume {
    device: DeviceNumber,
    overlay: Option<RunningOverlay>,
}

impl PublicVolume {
    pub(super) fn new(device: DeviceNumber) -> Self {
        Self {
            device,
            overlay: None,
        }
    }

    pub fn device(&self) -> DeviceNumber {
        self.device
    }

    fn dev_path(base: &VolumeBase, ctx: &Context) -> PathBuf {
        ctx.config.paths.dev_dir.join(base.id())
    }
}

fn unsupported(message: String) -> StorageError {
    StorageError::new(StorageErrorKind::Unsupported, message)
}

#[async_trait]
impl VolumeHooks for PublicVolume {
    async fn do_create(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        ctx.system()
            .create_device_node(&Self::dev_path(base, ctx), self.device)
            .await
    }

    async fn do_destroy(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        ctx.system()
            .destroy_device_node(&Self::dev_path(base, ctx))
            .await
    }

    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let dev_path = Self::dev_path(base, ctx);
        let metadata = blkid::read_metadata(ctx.commands(), &dev_path)
            .await?
            .ok_or_else(|| unsupported(format!("no filesystem found on {}", base.id())))?;
        base.set_fs_metadata(ctx, &metadata.fs_type, &metadata.fs_uuid, &metadata.fs_label);

        let fs: Filesystem = metadata
            .fs_type
            .parse()
            .map_err(|_| unsupported(format!("unsupported filesystem {}", metadata.fs_type)))?;
        if !fs.is_portable() || !ctx.supports(fs) {
            return Err(unsupported(format!("{fs} is not supported on public volumes")));
        }

        fs_tools::check(ctx.commands(), fs, &dev_path).await?;

        let stable_name = if metadata.fs_uuid.is_empty() {
            base.id().to_string()
        } else {
            metadata.fs_uuid.clone()
        };
        let paths = &ctx.config.paths;
        let media = &ctx.config.overlay;
        let raw_path = paths.media_rw.join(&stable_name);
        base.set_internal_path(ctx, &raw_path)?;

        let system = ctx.system();
        system.prepare_dir(&raw_path, 0o700, 0, 0).await?;
        let request = fs_tools::portable_mount_request(
            fs,
            &dev_path,
            &raw_path,
            media.media_rw_uid,
            media.media_rw_gid,
            RAW_MASK,
        );
        if let Err(e) = system.mount(&request).await {
            if let Err(cleanup) = system.remove_dir(&raw_path).await {
                tracing::warn!(path = %raw_path.display(), "Failed to remove mount point: {}", cleanup);
            }
            return Err(e);
        }

        if !base.is_visible() {
            base.set_path(ctx, &raw_path)?;
            return Ok(());
        }

        let request = OverlayRequest {
            source: raw_path.clone(),
            label: stable_name.clone(),
            uid: media.media_rw_uid,
            gid: media.media_rw_gid,
            user_id: base.mount_user_id().unwrap_or(0),
            full_write: false,
            multi_user: false,
        };
        let views = OverlayViews::new(&paths.runtime, &stable_name);
        match overlay::start(ctx, views, &request).await {
            Ok(running) => self.overlay = Some(running),
            Err(e) => {
                overlay::teardown(ctx, None, None, Some(&raw_path)).await;
                return Err(e);
            }
        }

        base.set_path(ctx, &paths.storage.join(&stable_name))
    }

    async fn do_unmount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let visible = base.path().map(PathBuf::from);
        let raw = base.internal_path().map(PathBuf::from);
        let overlay = self.overlay.take();

        // Without an overlay the visible path is the raw mount itself
        let visible = visible.filter(|_| overlay.is_some());
        overlay::teardown(ctx, visible.as_deref(), overlay, raw.as_deref()).await;
        Ok(())
    }

    async fn do_format(
        &mut self,
        base: &mut VolumeBase,
        ctx: &Context,
        fs_type: FsType,
    ) -> Result<(), StorageError> {
        let dev_path = Self::dev_path(base, ctx);
        let fs = match fs_type {
            FsType::Explicit(fs) => fs,
            FsType::Auto => match (ctx.supports(Filesystem::Vfat), ctx.supports(Filesystem::Exfat)) {
                (true, true) => {
                    let size = ctx.system().block_device_size(&dev_path).await?;
                    if size > EXFAT_THRESHOLD {
                        Filesystem::Exfat
                    } else {
                        Filesystem::Vfat
                    }
                }
                (true, false) => Filesystem::Vfat,
                (false, true) => Filesystem::Exfat,
                (false, false) => {
                    return Err(unsupported(format!(
                        "no portable filesystem available to format {}",
                        base.id()
                    )));
                }
            },
        };

        if !fs.is_portable() || !ctx.supports(fs) {
            return Err(unsupported(format!("cannot format public volumes as {fs}")));
        }

        tracing::info!(volume = %base.id(), filesystem = %fs, "Formatting public volume");
        fs_tools::wipe(ctx.commands(), &dev_path).await;
        fs_tools::format(ctx.commands(), fs, &dev_path).await
    }
}
