// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use async_trait::async_trait;
use vold_contracts::{StorageError, StorageErrorKind};
use vold_sys::{blkid, fs_tools};
use vold_types::{DeviceNumber, Filesystem, FsType};

use super::{Volume, VolumeBase, VolumeHooks};
use crate::context::Context;

/// Major number of MMC block devices, which prefer f2fs
const MMC_MAJOR: u32 = 179;

const SYSTEM_UID: u32 = 1000;
const SHELL_UID: u32 = 2000;

#[derive(Debug, Clone, Copy)]
enum Owner {
    Fixed(u32, u32),
    MediaRw,
}

/// Well-known directories created on every private mount
const PRIVATE_DIRS: [(&str, u32, Owner); 7] = [
    ("app", 0o771, Owner::Fixed(SYSTEM_UID, SYSTEM_UID)),
    ("user", 0o711, Owner::Fixed(SYSTEM_UID, SYSTEM_UID)),
    ("user_de", 0o711, Owner::Fixed(SYSTEM_UID, SYSTEM_UID)),
    ("media", 0o770, Owner::MediaRw),
    ("media/0", 0o770, Owner::MediaRw),
    ("local", 0o751, Owner::Fixed(0, 0)),
    ("local/tmp", 0o771, Owner::Fixed(SHELL_UID, SHELL_UID)),
];

/// Encrypted partition mapped through the crypto backend
#[derive(Debug)]
pub struct PrivateVolume {
    device: DeviceNumber,
    key: Vec<u8>,
    dm_path: Option<PathBuf>,
}

impl PrivateVolume {
    pub(super) fn new(device: DeviceNumber, key: Vec<u8>) -> Self {
        Self {
            device,
            key,
            dm_path: None,
        }
    }

    pub fn device(&self) -> DeviceNumber {
        self.device
    }

    /// Decrypted device, present between create and destroy
    pub fn mapped_device(&self) -> Option<&std::path::Path> {
        self.dm_path.as_deref()
    }

    fn raw_path(base: &VolumeBase, ctx: &Context) -> PathBuf {
        ctx.config.paths.dev_dir.join(base.id())
    }

    fn require_mapping(&self, base: &VolumeBase) -> Result<PathBuf, StorageError> {
        self.dm_path
            .clone()
            .ok_or_else(|| StorageError::internal(format!("{} has no crypto mapping", base.id())))
    }
}

#[async_trait]
impl VolumeHooks for PrivateVolume {
    async fn do_create(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let expected = ctx.adapters.crypto.key_size();
        if self.key.len() != expected {
            return Err(StorageError::invalid_input(format!(
                "key for {} is {} bytes, expected {expected}",
                base.id(),
                self.key.len()
            )));
        }

        let raw_path = Self::raw_path(base, ctx);
        ctx.system().create_device_node(&raw_path, self.device).await?;

        match ctx.adapters.crypto.setup(base.id(), &raw_path, &self.key).await {
            Ok(dm_path) => {
                tracing::debug!(volume = %base.id(), mapped = %dm_path.display(), "Crypto mapping ready");
                self.dm_path = Some(dm_path);
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = ctx.system().destroy_device_node(&raw_path).await {
                    tracing::warn!(path = %raw_path.display(), "Failed to remove device node: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn do_destroy(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        if self.dm_path.take().is_some() {
            if let Err(e) = ctx.adapters.crypto.revert(base.id()).await {
                tracing::warn!(volume = %base.id(), "Failed to tear down crypto mapping: {}", e);
            }
        }
        ctx.system()
            .destroy_device_node(&Self::raw_path(base, ctx))
            .await
    }

    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let dm_path = self.require_mapping(base)?;
        let metadata = blkid::read_metadata(ctx.commands(), &dm_path)
            .await?
            .ok_or_else(|| {
                StorageError::new(
                    StorageErrorKind::Unsupported,
                    format!("no filesystem found on {}", base.id()),
                )
            })?;
        base.set_fs_metadata(ctx, &metadata.fs_type, &metadata.fs_uuid, &metadata.fs_label);

        let fs = metadata
            .fs_type
            .parse::<Filesystem>()
            .ok()
            .filter(|fs| fs.is_adoptable() && ctx.supports(*fs))
            .ok_or_else(|| {
                StorageError::new(
                    StorageErrorKind::Unsupported,
                    format!("unsupported filesystem {} on {}", metadata.fs_type, base.id()),
                )
            })?;

        if metadata.fs_uuid.is_empty() {
            return Err(StorageError::internal(format!(
                "{} has no filesystem UUID",
                base.id()
            )));
        }

        let path = ctx.config.paths.expand.join(&metadata.fs_uuid);
        base.set_internal_path(ctx, &path)?;
        base.set_path(ctx, &path)?;

        fs_tools::check(ctx.commands(), fs, &dm_path).await?;

        let system = ctx.system();
        system.prepare_dir(&path, 0o700, 0, 0).await?;
        if let Err(e) = system
            .mount(&fs_tools::native_mount_request(fs, &dm_path, &path))
            .await
        {
            if let Err(cleanup) = system.remove_dir(&path).await {
                tracing::warn!(path = %path.display(), "Failed to remove mount point: {}", cleanup);
            }
            return Err(e);
        }

        let media = &ctx.config.overlay;
        for (dir, mode, owner) in PRIVATE_DIRS {
            let (uid, gid) = match owner {
                Owner::Fixed(uid, gid) => (uid, gid),
                Owner::MediaRw => (media.media_rw_uid, media.media_rw_gid),
            };
            system.prepare_dir(&path.join(dir), mode, uid, gid).await?;
        }

        let mut emulated = Volume::stacked_emulated(&path.join("media"), self.device, &metadata.fs_uuid);
        if let Some(disk_id) = base.disk_id() {
            emulated.base_mut().set_disk_id(disk_id)?;
        }
        if let Err(e) = emulated.create(ctx).await {
            tracing::warn!(volume = %base.id(), "Failed to create stacked emulated volume: {}", e);
        } else if let Err(e) = emulated.mount(ctx).await {
            tracing::warn!(volume = %base.id(), "Failed to mount stacked emulated volume: {}", e);
        }
        base.push_stacked(emulated);

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

    async fn do_format(
        &mut self,
        base: &mut VolumeBase,
        ctx: &Context,
        fs_type: FsType,
    ) -> Result<(), StorageError> {
        let dm_path = self.require_mapping(base)?;
        let fs = match fs_type {
            FsType::Explicit(fs) => fs,
            FsType::Auto if self.device.major == MMC_MAJOR && ctx.supports(Filesystem::F2fs) => {
                Filesystem::F2fs
            }
            FsType::Auto => Filesystem::Ext4,
        };

        if !fs.is_adoptable() || !ctx.supports(fs) {
            return Err(StorageError::new(
                StorageErrorKind::Unsupported,
                format!("cannot format private volumes as {fs}"),
            ));
        }

        tracing::info!(volume = %base.id(), filesystem = %fs, "Formatting private volume");
        fs_tools::format(ctx.commands(), fs, &dm_path).await
    }
}
