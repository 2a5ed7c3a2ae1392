// SPDX-License-Identifier: GPL-3.0-only

//! Physical block devices and the volumes parsed from their partition tables

use std::path::PathBuf;

use uuid::Uuid;
use vold_contracts::{StorageError, StorageErrorKind, StorageEvent};
use vold_sys::{blkid, sgdisk, PartitionType};
use vold_types::{
    pretty_size, DeviceNumber, DiskFlags, DiskInfo, FsType, PartitionTableType, VolumeInfo,
    VolumeState, GPT_ANDROID_EXPAND, GPT_BASIC_DATA, MBR_PUBLIC_TYPES,
};

use crate::context::Context;
use crate::keys::KeyStore;
use crate::volume::Volume;

const LOOP_MAJOR: u32 = 7;
const MMC_MAJOR: u32 = 179;

/// Partition minors of SCSI and virtio disks are statically allocated
const STATIC_MAX_MINORS: u32 = 15;
const NVME_MAX_MINORS: u32 = 63;

/// Valid public share sizes for a mixed layout, in percent of the disk
pub const MIXED_RATIO_RANGE: std::ops::RangeInclusive<u64> = 10..=90;

/// Bus a disk hangs off, derived from its major number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusClass {
    Loop,
    Scsi,
    Mmc,
    Virtio,
    Nvme,
}

impl BusClass {
    pub fn classify(device: DeviceNumber, sys_path: &str) -> Option<Self> {
        if sys_path.contains("/nvme") {
            return Some(Self::Nvme);
        }
        match device.major {
            LOOP_MAJOR => Some(Self::Loop),
            8 | 65..=71 | 128..=135 => Some(Self::Scsi),
            MMC_MAJOR => Some(Self::Mmc),
            240..=254 => Some(Self::Virtio),
            _ => None,
        }
    }
}

/// Human name for an MMC manufacturer id
fn mmc_vendor(manfid: u32) -> Option<&'static str> {
    match manfid {
        0x03 => Some("SanDisk"),
        0x1b => Some("Samsung"),
        0x28 => Some("Lexar"),
        0x74 => Some("Transcend"),
        _ => None,
    }
}

fn parse_sysfs_number(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn unsupported_major(device: DeviceNumber) -> StorageError {
    StorageError::new(
        StorageErrorKind::Unsupported,
        format!("unsupported block major {}", device.major),
    )
}

#[derive(Debug)]
pub struct Disk {
    id: String,
    sys_path: String,
    device: DeviceNumber,
    nickname: String,
    flags: DiskFlags,
    size: u64,
    label: String,
    volumes: Vec<Volume>,
    created: bool,
    just_partitioned: bool,
}

impl Disk {
    /// `sys_path` is the kernel DEVPATH of the whole-disk device
    pub fn new(sys_path: &str, device: DeviceNumber, nickname: &str, flags: DiskFlags) -> Self {
        Self {
            id: format!("disk:{}", device.id_fragment()),
            sys_path: sys_path.to_string(),
            device,
            nickname: nickname.to_string(),
            flags,
            size: 0,
            label: String::new(),
            volumes: Vec::new(),
            created: false,
            just_partitioned: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> DeviceNumber {
        self.device
    }

    pub fn sys_path(&self) -> &str {
        &self.sys_path
    }

    pub fn flags(&self) -> DiskFlags {
        self.flags
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_just_partitioned(&self) -> bool {
        self.just_partitioned
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volumes_mut(&mut self) -> &mut [Volume] {
        &mut self.volumes
    }

    fn dev_path(&self, ctx: &Context) -> PathBuf {
        ctx.config.paths.dev_dir.join(&self.id)
    }

    fn sysfs_path(&self, ctx: &Context, attr: &str) -> PathBuf {
        ctx.config
            .paths
            .sys_root
            .join(self.sys_path.trim_start_matches('/'))
            .join(attr)
    }

    pub async fn create(&mut self, ctx: &Context) -> Result<(), StorageError> {
        if self.created {
            return Err(StorageError::internal(format!("disk {} is already created", self.id)));
        }
        self.created = true;

        let dev_path = self.dev_path(ctx);
        if let Err(e) = ctx.system().create_device_node(&dev_path, self.device).await {
            tracing::warn!(disk = %self.id, path = %dev_path.display(), "Failed to create device node: {}", e);
        }

        tracing::info!(disk = %self.id, nickname = %self.nickname, "Disk created");
        ctx.notify(StorageEvent::DiskCreated {
            disk_id: self.id.clone(),
            flags: self.flags.bits(),
        });

        if let Err(e) = self.read_metadata(ctx).await {
            tracing::warn!(disk = %self.id, "Failed to read disk metadata: {}", e);
        }
        if let Err(e) = self.read_partitions(ctx).await {
            tracing::warn!(disk = %self.id, "Failed to read partitions: {}", e);
        }
        Ok(())
    }

    pub async fn destroy(&mut self, ctx: &Context) -> Result<(), StorageError> {
        if !self.created {
            return Err(StorageError::internal(format!("disk {} was never created", self.id)));
        }

        self.destroy_all_volumes(ctx).await;

        let dev_path = self.dev_path(ctx);
        if let Err(e) = ctx.system().destroy_device_node(&dev_path).await {
            tracing::warn!(disk = %self.id, path = %dev_path.display(), "Failed to remove device node: {}", e);
        }

        ctx.notify(StorageEvent::DiskDestroyed {
            disk_id: self.id.clone(),
        });
        self.created = false;
        tracing::info!(disk = %self.id, "Disk destroyed");
        Ok(())
    }

    async fn destroy_all_volumes(&mut self, ctx: &Context) {
        for mut volume in std::mem::take(&mut self.volumes) {
            if let Err(e) = volume.destroy(ctx).await {
                tracing::warn!(disk = %self.id, volume = %volume.id(), "Failed to destroy volume: {}", e);
            }
        }
    }

    /// Refresh size and label, then notify even when the bus is unknown
    pub async fn read_metadata(&mut self, ctx: &Context) -> Result<(), StorageError> {
        let system = ctx.system();
        self.size = match system.block_device_size(&self.dev_path(ctx)).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(disk = %self.id, "Failed to read disk size: {}", e);
                0
            }
        };

        let result = match BusClass::classify(self.device, &self.sys_path) {
            Some(BusClass::Loop | BusClass::Virtio) => {
                self.label = "Virtual".to_string();
                Ok(())
            }
            Some(BusClass::Nvme) => {
                self.label = "NVMe".to_string();
                Ok(())
            }
            Some(BusClass::Scsi) => system
                .read_sysfs_attr(&self.sysfs_path(ctx, "device/vendor"))
                .await
                .map(|vendor| self.label = vendor.map(|v| v.trim().to_string()).unwrap_or_default()),
            Some(BusClass::Mmc) => system
                .read_sysfs_attr(&self.sysfs_path(ctx, "device/manfid"))
                .await
                .map(|manfid| {
                    self.label = manfid
                        .as_deref()
                        .and_then(parse_sysfs_number)
                        .and_then(mmc_vendor)
                        .unwrap_or_default()
                        .to_string()
                }),
            None => {
                self.label.clear();
                Err(unsupported_major(self.device))
            }
        };

        tracing::debug!(
            disk = %self.id,
            size = %pretty_size(self.size),
            label = %self.label,
            "Read disk metadata"
        );
        ctx.notify(StorageEvent::DiskMetadataChanged {
            disk_id: self.id.clone(),
            size: self.size,
            label: self.label.clone(),
            sys_path: self.sys_path.clone(),
        });
        result
    }

    /// Highest partition index the kernel can expose for this disk
    pub async fn max_minors(&self, ctx: &Context) -> Result<u32, StorageError> {
        let paths = &ctx.config.paths;
        let parameter = match BusClass::classify(self.device, &self.sys_path) {
            Some(BusClass::Scsi | BusClass::Virtio) => return Ok(STATIC_MAX_MINORS),
            Some(BusClass::Nvme) => return Ok(NVME_MAX_MINORS),
            Some(BusClass::Loop) => &paths.loop_max_part,
            Some(BusClass::Mmc) => &paths.mmc_perdev_minors,
            None => return Err(unsupported_major(self.device)),
        };

        let raw = ctx.system().read_sysfs_attr(parameter).await?.ok_or_else(|| {
            StorageError::new(
                StorageErrorKind::Unavailable,
                format!("{} is not available", parameter.display()),
            )
        })?;
        parse_sysfs_number(&raw).ok_or_else(|| {
            StorageError::internal(format!("malformed {}: {}", parameter.display(), raw.trim()))
        })
    }

    /// Rebuild the volume list from the current partition table
    pub async fn read_partitions(&mut self, ctx: &Context) -> Result<(), StorageError> {
        let max_minors = self.max_minors(ctx).await?;
        self.destroy_all_volumes(ctx).await;

        let dev_path = self.dev_path(ctx);
        let output = ctx
            .commands()
            .run(sgdisk::SGDISK, &sgdisk::dump_args(&dev_path))
            .await;
        let output = match output {
            Ok(output) if output.success() => output,
            other => {
                self.finish_scan(ctx);
                return Err(match other {
                    Ok(output) => StorageError::internal(format!(
                        "sgdisk failed to scan {} with status {}",
                        dev_path.display(),
                        output.status
                    )),
                    Err(e) => e,
                });
            }
        };

        let dump = sgdisk::parse_android_dump(&output.stdout);
        let mut found = false;
        for partition in &dump.partitions {
            if partition.index == 0 || partition.index > max_minors {
                tracing::warn!(disk = %self.id, index = partition.index, max_minors, "Partition index out of range");
                continue;
            }
            let device = self.device.partition(partition.index);

            match &partition.kind {
                PartitionType::Mbr(code) if MBR_PUBLIC_TYPES.contains(code) => {
                    found = true;
                    self.create_volume(ctx, Volume::public(device), None).await;
                }
                PartitionType::Gpt { type_guid, .. } if type_guid.eq_ignore_ascii_case(GPT_BASIC_DATA) => {
                    found = true;
                    self.create_volume(ctx, Volume::public(device), None).await;
                }
                PartitionType::Gpt {
                    type_guid,
                    part_guid,
                } if type_guid.eq_ignore_ascii_case(GPT_ANDROID_EXPAND) => {
                    found = true;
                    self.create_private_volume(ctx, device, part_guid).await;
                }
                _ => {}
            }
        }

        if dump.table == PartitionTableType::Unknown || !found {
            tracing::debug!(disk = %self.id, "No usable partitions, probing whole device");
            match blkid::read_metadata(ctx.commands(), &dev_path).await {
                Ok(Some(_)) => self.create_volume(ctx, Volume::public(self.device), None).await,
                Ok(None) => tracing::debug!(disk = %self.id, "Whole device carries no filesystem"),
                Err(e) => tracing::warn!(disk = %self.id, "Failed to probe whole device: {}", e),
            }
        }

        self.finish_scan(ctx);
        Ok(())
    }

    fn finish_scan(&mut self, ctx: &Context) {
        ctx.notify(StorageEvent::DiskScanned {
            disk_id: self.id.clone(),
        });
        self.just_partitioned = false;
    }

    async fn create_private_volume(&mut self, ctx: &Context, device: DeviceNumber, part_guid: &str) {
        let key = match ctx.keys.read_key(part_guid).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                tracing::warn!(disk = %self.id, part_guid, "No key for private partition, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(disk = %self.id, part_guid, "Failed to read partition key: {}", e);
                return;
            }
        };
        self.create_volume(ctx, Volume::private(device, key), Some(part_guid))
            .await;
    }

    async fn create_volume(&mut self, ctx: &Context, mut volume: Volume, part_guid: Option<&str>) {
        if self.just_partitioned {
            tracing::debug!(disk = %self.id, volume = %volume.id(), "Formatting freshly partitioned volume");
            if let Err(e) = self.format_silently(ctx, &mut volume).await {
                tracing::warn!(disk = %self.id, volume = %volume.id(), "Initial format failed: {}", e);
            }
        }

        let base = volume.base_mut();
        if let Err(e) = base.set_disk_id(&self.id) {
            tracing::warn!(volume = %base.id(), "Failed to attach volume to disk: {}", e);
        }
        if let Some(part_guid) = part_guid {
            if let Err(e) = base.set_part_guid(part_guid) {
                tracing::warn!(volume = %base.id(), "Failed to record partition GUID: {}", e);
            }
        }

        if let Err(e) = volume.create(ctx).await {
            tracing::warn!(disk = %self.id, volume = %volume.id(), "Failed to create volume: {}", e);
        }
        self.volumes.push(volume);
    }

    async fn format_silently(&self, ctx: &Context, volume: &mut Volume) -> Result<(), StorageError> {
        volume.base_mut().set_silent(true)?;
        let created = volume.create(ctx).await;
        let formatted = match created {
            Ok(()) => volume.format(ctx, FsType::Auto).await,
            Err(e) => Err(e),
        };
        let destroyed = volume.destroy(ctx).await;
        volume.base_mut().set_silent(false)?;
        formatted.and(destroyed)
    }

    /// Wipe the table and lay out a single public partition
    pub async fn partition_public(&mut self, ctx: &Context) -> Result<(), StorageError> {
        self.destroy_all_volumes(ctx).await;
        self.just_partitioned = true;
        self.zap(ctx).await;

        let dev_path = self.dev_path(ctx);
        self.write_table(ctx, sgdisk::public_table_args(&dev_path)).await
    }

    pub async fn partition_private(&mut self, ctx: &Context) -> Result<(), StorageError> {
        self.partition_mixed_inner(ctx, 0).await
    }

    /// Public share of `ratio` percent, metadata, then a private remainder
    pub async fn partition_mixed(&mut self, ctx: &Context, ratio: u64) -> Result<(), StorageError> {
        if !MIXED_RATIO_RANGE.contains(&ratio) {
            return Err(StorageError::invalid_input(format!(
                "mixed ratio {ratio} outside {}..={}",
                MIXED_RATIO_RANGE.start(),
                MIXED_RATIO_RANGE.end()
            )));
        }
        self.partition_mixed_inner(ctx, ratio).await
    }

    async fn partition_mixed_inner(&mut self, ctx: &Context, ratio: u64) -> Result<(), StorageError> {
        let part_guid = Uuid::new_v4().to_string();
        let key = KeyStore::generate(ctx.adapters.crypto.key_size());
        ctx.keys.write_key(&part_guid, &key).await?;

        self.destroy_all_volumes(ctx).await;
        self.just_partitioned = true;
        self.zap(ctx).await;

        let public_mb = (ratio > 0).then(|| ((self.size / 100) * ratio) / 1024 / 1024);
        let dev_path = self.dev_path(ctx);
        tracing::info!(disk = %self.id, ratio, part_guid = %part_guid, "Writing mixed partition table");
        self.write_table(ctx, sgdisk::mixed_table_args(&dev_path, public_mb, &part_guid))
            .await
    }

    /// Erase the existing table; the table write that follows reports real failures
    async fn zap(&self, ctx: &Context) {
        let args = sgdisk::zap_args(&self.dev_path(ctx));
        match ctx.commands().run(sgdisk::SGDISK, &args).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                tracing::warn!(disk = %self.id, status = output.status, "Failed to zap partition table")
            }
            Err(e) => tracing::warn!(disk = %self.id, "Failed to zap partition table: {}", e),
        }
    }

    async fn write_table(&self, ctx: &Context, args: Vec<String>) -> Result<(), StorageError> {
        let output = ctx.commands().run(sgdisk::SGDISK, &args).await?;
        if output.success() {
            Ok(())
        } else {
            Err(StorageError::internal(format!(
                "sgdisk failed to partition {} with status {}: {}",
                self.id,
                output.status,
                output.stderr.trim()
            )))
        }
    }

    /// Unmount every mounted volume, logging failures
    pub async fn unmount_all(&mut self, ctx: &Context) {
        for volume in &mut self.volumes {
            if volume.state() == VolumeState::Mounted {
                if let Err(e) = volume.unmount(ctx).await {
                    tracing::warn!(volume = %volume.id(), "Failed to unmount: {}", e);
                }
            }
        }
    }

    pub fn find_volume(&self, id: &str) -> Option<&Volume> {
        self.volumes.iter().find_map(|v| v.find(id))
    }

    pub fn find_volume_mut(&mut self, id: &str) -> Option<&mut Volume> {
        self.volumes.iter_mut().find_map(|v| v.find_mut(id))
    }

    pub fn collect_volume_info(&self, out: &mut Vec<VolumeInfo>) {
        for volume in &self.volumes {
            volume.collect_info(out);
        }
    }

    pub fn info(&self, pending: bool) -> DiskInfo {
        DiskInfo {
            id: self.id.clone(),
            sys_path: self.sys_path.clone(),
            nickname: self.nickname.clone(),
            size: self.size,
            label: self.label.clone(),
            flags: self.flags.bits(),
            volumes: self.volumes.iter().map(|v| v.id().to_string()).collect(),
            pending,
        }
    }
}
