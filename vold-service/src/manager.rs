// SPDX-License-Identifier: GPL-3.0-only

//! Registry of disks and volumes and the control-plane operations on it
//!
//! Every registry mutation happens under a single async mutex, shared by
//! hotplug events and control-plane calls. Encryption control-plane calls
//! are serialized by a second, independent mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use vold_contracts::validation::{validate_hex, validate_id, validate_path};
use vold_contracts::{
    EventListener, OperationId, OperationKind, ProcessEntry, RemountPlan, StorageError,
};
use vold_types::{
    BlockAction, BlockEvent, DiskFlag, DiskInfo, FsType, MountFlag, MountFlags, PartitionLayout,
    RemountMode, VolumeInfo, VolumeState, VolumeType,
};

use crate::context::Context;
use crate::disk::Disk;
use crate::disk_source::DiskSource;
use crate::maintenance::{self, Maintenance};
use crate::volume::{StubVolume, Volume};

const MMC_MAJOR: u32 = 179;

/// Block majors reserved for local/experimental use, SD cards on emulators
const EXPERIMENTAL_MAJORS: std::ops::RangeInclusive<u32> = 240..=254;

struct Registry {
    disk_sources: Vec<DiskSource>,
    disks: Vec<Disk>,
    /// Disks seen while the secure keyguard was showing, not yet scanned
    pending_disks: Vec<Disk>,
    internal: Option<Volume>,
    obbs: Vec<Volume>,
    stubs: Vec<Volume>,
    next_obb_id: u32,
    next_stub_id: u32,
    /// user id -> serial
    added_users: BTreeMap<u32, i32>,
    started_users: BTreeSet<u32>,
    secure_keyguard_showing: bool,
    primary: Option<String>,
}

impl Registry {
    fn new(disk_sources: Vec<DiskSource>) -> Self {
        Self {
            disk_sources,
            disks: Vec::new(),
            pending_disks: Vec::new(),
            internal: None,
            obbs: Vec::new(),
            stubs: Vec::new(),
            next_obb_id: 0,
            next_stub_id: 0,
            added_users: BTreeMap::new(),
            started_users: BTreeSet::new(),
            // Media stays untouched until the keyguard state is known
            secure_keyguard_showing: true,
            primary: None,
        }
    }

    fn find_volume(&self, id: &str) -> Option<&Volume> {
        self.internal
            .iter()
            .chain(&self.obbs)
            .chain(&self.stubs)
            .find_map(|v| v.find(id))
            .or_else(|| self.disks.iter().find_map(|d| d.find_volume(id)))
    }

    fn find_volume_mut(&mut self, id: &str) -> Option<&mut Volume> {
        self.internal
            .iter_mut()
            .chain(self.obbs.iter_mut())
            .chain(self.stubs.iter_mut())
            .chain(self.disks.iter_mut().flat_map(|d| d.volumes_mut().iter_mut()))
            .find_map(|v| v.find_mut(id))
    }

    fn find_disk_mut(&mut self, id: &str) -> Option<&mut Disk> {
        self.disks.iter_mut().find(|d| d.id() == id)
    }

    fn all_volumes(&self) -> Vec<VolumeInfo> {
        let mut out = Vec::new();
        for volume in self.internal.iter().chain(&self.obbs).chain(&self.stubs) {
            volume.collect_info(&mut out);
        }
        for disk in &self.disks {
            disk.collect_volume_info(&mut out);
        }
        out
    }

    /// Paths worth trimming: the data partition and every mounted private volume
    fn trim_targets(&self, data_path: &Path) -> Vec<PathBuf> {
        let mut targets = vec![data_path.to_path_buf()];
        let mut volumes = Vec::new();
        for disk in &self.disks {
            disk.collect_volume_info(&mut volumes);
        }
        targets.extend(
            volumes
                .into_iter()
                .filter(|v| v.volume_type == VolumeType::Private && v.state == VolumeState::Mounted)
                .filter_map(|v| v.path.map(PathBuf::from)),
        );
        targets
    }
}

fn volume_not_found(id: &str) -> StorageError {
    StorageError::not_found(format!("Volume not found: {id}"))
}

async fn unmount_if_mounted(ctx: &Context, volume: &mut Volume) {
    if volume.state() == VolumeState::Mounted {
        if let Err(e) = volume.unmount(ctx).await {
            tracing::warn!(volume = %volume.id(), "Failed to unmount: {}", e);
        }
    }
}

async fn destroy_logged(ctx: &Context, volume: &mut Volume) {
    if let Err(e) = volume.destroy(ctx).await {
        tracing::warn!(volume = %volume.id(), "Failed to destroy volume: {}", e);
    }
}

pub struct VolumeManager {
    ctx: Arc<Context>,
    registry: Mutex<Registry>,
    crypto_lock: Mutex<()>,
    maintenance: Arc<Maintenance>,
}

impl VolumeManager {
    pub fn new(ctx: Arc<Context>, disk_sources: Vec<DiskSource>) -> Self {
        Self {
            ctx,
            registry: Mutex::new(Registry::new(disk_sources)),
            crypto_lock: Mutex::new(()),
            maintenance: Arc::new(Maintenance::new()),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn EventListener>>) {
        self.ctx.notifier.set_listener(listener);
    }

    /// Clear stale mounts and bring up the internal emulated volume
    pub async fn start(&self) -> Result<(), StorageError> {
        let mut registry = self.registry.lock().await;
        if registry.internal.is_some() {
            return Err(StorageError::internal("volume manager is already started"));
        }

        if let Err(e) = self.unmount_all_locked(&mut registry).await {
            tracing::warn!("Startup unmount sweep incomplete: {}", e);
        }

        let mut internal = Volume::internal_emulated(&self.ctx.config.paths.data_media);
        let created = internal.create(&self.ctx).await;
        registry.internal = Some(internal);
        tracing::info!("Volume manager started");
        created
    }

    pub async fn handle_block_event(&self, event: &BlockEvent) {
        if !event.is_disk() {
            return;
        }

        let ctx = self.ctx.as_ref();
        let mut registry = self.registry.lock().await;
        let device = event.device;

        match event.action {
            BlockAction::Add => {
                let Some(source) = registry
                    .disk_sources
                    .iter()
                    .find(|s| s.matches(&event.event_path))
                else {
                    tracing::debug!(path = %event.event_path, "Ignoring unmanaged block device");
                    return;
                };

                if registry
                    .disks
                    .iter()
                    .chain(&registry.pending_disks)
                    .any(|d| d.device() == device)
                {
                    tracing::warn!(device = %device, "Disk already tracked");
                    return;
                }

                let mut flags = source.flags();
                let experimental = ctx.config.emulator && EXPERIMENTAL_MAJORS.contains(&device.major);
                if device.major == MMC_MAJOR || experimental {
                    flags |= DiskFlag::Sd;
                } else {
                    flags |= DiskFlag::Usb;
                }

                let mut disk = Disk::new(&event.event_path, device, source.nickname(), flags);
                if registry.secure_keyguard_showing {
                    tracing::info!(disk = %disk.id(), "Keyguard showing, deferring disk scan");
                    registry.pending_disks.push(disk);
                } else {
                    if let Err(e) = disk.create(ctx).await {
                        tracing::error!(disk = %disk.id(), "Failed to create disk: {}", e);
                    }
                    registry.disks.push(disk);
                }
            }
            BlockAction::Change => {
                tracing::debug!(device = %device, "Disk changed");
                for disk in registry.disks.iter_mut().filter(|d| d.device() == device) {
                    if let Err(e) = disk.read_metadata(ctx).await {
                        tracing::warn!(disk = %disk.id(), "Failed to read disk metadata: {}", e);
                    }
                    if let Err(e) = disk.read_partitions(ctx).await {
                        tracing::warn!(disk = %disk.id(), "Failed to read partitions: {}", e);
                    }
                }
            }
            BlockAction::Remove => {
                let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut registry.disks)
                    .into_iter()
                    .partition(|d| d.device() == device);
                registry.disks = kept;
                for mut disk in removed {
                    if let Err(e) = disk.destroy(ctx).await {
                        tracing::warn!(disk = %disk.id(), "Failed to destroy disk: {}", e);
                    }
                }
                registry.pending_disks.retain(|d| d.device() != device);

                if let Some(primary) = registry.primary.clone() {
                    if registry.find_volume(&primary).is_none() {
                        registry.primary = None;
                    }
                }
            }
        }
    }

    pub async fn on_secure_keyguard_state_changed(&self, showing: bool) {
        let mut registry = self.registry.lock().await;
        registry.secure_keyguard_showing = showing;
        if showing {
            return;
        }

        for mut disk in std::mem::take(&mut registry.pending_disks) {
            tracing::info!(disk = %disk.id(), "Scanning deferred disk");
            if let Err(e) = disk.create(&self.ctx).await {
                tracing::error!(disk = %disk.id(), "Failed to create disk: {}", e);
            }
            registry.disks.push(disk);
        }
    }

    pub async fn mount(
        &self,
        volume_id: &str,
        flags: MountFlags,
        user_id: Option<u32>,
    ) -> Result<(), StorageError> {
        validate_id(volume_id)?;
        let mut registry = self.registry.lock().await;
        let volume = registry
            .find_volume_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;

        volume.base_mut().set_mount_flags(flags)?;
        volume.base_mut().set_mount_user_id(user_id)?;
        volume.mount(&self.ctx).await?;

        if flags.contains(MountFlag::Primary) {
            registry.primary = Some(volume_id.to_string());
            let users: Vec<u32> = registry.started_users.iter().copied().collect();
            for user_id in users {
                if let Err(e) = self.link_primary(&registry, user_id).await {
                    tracing::warn!(user_id, "Failed to link primary storage: {}", e);
                }
            }
        }
        Ok(())
    }

    pub async fn unmount(&self, volume_id: &str) -> Result<(), StorageError> {
        validate_id(volume_id)?;
        let mut registry = self.registry.lock().await;
        let volume = registry
            .find_volume_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        volume.unmount(&self.ctx).await
    }

    pub async fn format(&self, volume_id: &str, fs_type: &str) -> Result<(), StorageError> {
        validate_id(volume_id)?;
        let fs_type: FsType = fs_type
            .parse()
            .map_err(|e: anyhow::Error| StorageError::invalid_input(e.to_string()))?;

        let mut registry = self.registry.lock().await;
        let volume = registry
            .find_volume_mut(volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        volume.format(&self.ctx, fs_type).await
    }

    pub async fn partition(
        &self,
        disk_id: &str,
        layout: PartitionLayout,
        ratio: u64,
    ) -> Result<(), StorageError> {
        validate_id(disk_id)?;
        let mut registry = self.registry.lock().await;
        let disk = registry
            .find_disk_mut(disk_id)
            .ok_or_else(|| StorageError::not_found(format!("Disk not found: {disk_id}")))?;

        tracing::info!(disk = %disk_id, ?layout, ratio, "Partitioning disk");
        match layout {
            PartitionLayout::Public => disk.partition_public(&self.ctx).await,
            PartitionLayout::Private => disk.partition_private(&self.ctx).await,
            PartitionLayout::Mixed => disk.partition_mixed(&self.ctx, ratio).await,
        }
    }

    /// Drop the key of a private partition and any keys stored for its filesystem
    pub async fn forget_partition(&self, part_guid: &str, fs_uuid: &str) -> Result<(), StorageError> {
        validate_id(part_guid)?;
        let _registry = self.registry.lock().await;

        self.ctx.keys.forget_key(part_guid).await?;
        if !fs_uuid.is_empty() {
            validate_id(fs_uuid)?;
            self.ctx.keys.forget_volume_keys(fs_uuid).await?;
        }
        tracing::info!(part_guid, "Forgot partition");
        Ok(())
    }

    async fn link_primary(&self, registry: &Registry, user_id: u32) -> Result<(), StorageError> {
        let Some(primary) = registry
            .primary
            .as_deref()
            .and_then(|id| registry.find_volume(id))
        else {
            return Ok(());
        };
        let Some(path) = primary.base().path() else {
            return Ok(());
        };

        let system = self.ctx.system();
        let mut source = path.to_path_buf();
        if primary.base().volume_type() == VolumeType::Emulated {
            source = source.join(user_id.to_string());
            system.prepare_dir(&source, 0o755, 0, 0).await?;
        }

        let link = self
            .ctx
            .config
            .paths
            .user
            .join(user_id.to_string())
            .join("primary");
        tracing::debug!(user_id, source = %source.display(), "Linking primary storage");
        system.symlink(&source, &link).await
    }

    pub async fn on_user_added(&self, user_id: u32, serial: i32) {
        let mut registry = self.registry.lock().await;
        registry.added_users.insert(user_id, serial);
    }

    pub async fn on_user_removed(&self, user_id: u32) {
        let mut registry = self.registry.lock().await;
        registry.added_users.remove(&user_id);
    }

    pub async fn on_user_started(&self, user_id: u32) -> Result<(), StorageError> {
        let mut registry = self.registry.lock().await;

        let user_dir = self.ctx.config.paths.user.join(user_id.to_string());
        self.ctx.system().prepare_dir(&user_dir, 0o755, 0, 0).await?;

        registry.started_users.insert(user_id);
        self.link_primary(&registry, user_id).await
    }

    pub async fn on_user_stopped(&self, user_id: u32) {
        let mut registry = self.registry.lock().await;
        registry.started_users.remove(&user_id);
    }

    /// Re-announce every disk and volume to a fresh control-plane session
    pub async fn reset(&self) -> Result<(), StorageError> {
        let ctx = self.ctx.as_ref();
        let mut registry = self.registry.lock().await;

        if let Some(internal) = registry.internal.as_mut() {
            destroy_logged(ctx, internal).await;
            if let Err(e) = internal.create(ctx).await {
                tracing::warn!(volume = %internal.id(), "Failed to recreate volume: {}", e);
            }
        }
        for disk in &mut registry.disks {
            if let Err(e) = disk.destroy(ctx).await {
                tracing::warn!(disk = %disk.id(), "Failed to destroy disk: {}", e);
            }
            if let Err(e) = disk.create(ctx).await {
                tracing::warn!(disk = %disk.id(), "Failed to recreate disk: {}", e);
            }
        }

        registry.added_users.clear();
        registry.started_users.clear();
        tracing::info!("Volume manager reset");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), StorageError> {
        let ctx = self.ctx.as_ref();
        let mut registry = self.registry.lock().await;
        let Some(mut internal) = registry.internal.take() else {
            return Ok(());
        };

        tracing::info!("Shutting down volume manager");
        ctx.set_sleep_on_unmount(false);

        destroy_logged(ctx, &mut internal).await;
        for mut disk in std::mem::take(&mut registry.disks) {
            if let Err(e) = disk.destroy(ctx).await {
                tracing::warn!(disk = %disk.id(), "Failed to destroy disk: {}", e);
            }
        }
        registry.pending_disks.clear();
        for mut stub in std::mem::take(&mut registry.stubs) {
            destroy_logged(ctx, &mut stub).await;
        }
        registry.primary = None;

        ctx.set_sleep_on_unmount(true);
        Ok(())
    }

    pub async fn unmount_all(&self) -> Result<(), StorageError> {
        let mut registry = self.registry.lock().await;
        self.unmount_all_locked(&mut registry).await
    }

    async fn unmount_all_locked(&self, registry: &mut Registry) -> Result<(), StorageError> {
        let ctx = self.ctx.as_ref();

        if let Some(internal) = registry.internal.as_mut() {
            unmount_if_mounted(ctx, internal).await;
        }
        for stub in &mut registry.stubs {
            unmount_if_mounted(ctx, stub).await;
        }
        for disk in &mut registry.disks {
            disk.unmount_all(ctx).await;
        }

        let unmount = &ctx.config.unmount;
        let stale: Vec<PathBuf> = ctx
            .system()
            .mount_points()
            .await?
            .into_iter()
            .filter(|path| unmount.is_managed(path))
            .collect();

        for path in stale.iter().rev() {
            tracing::debug!(path = %path.display(), "Unmounting stale mount");
            if let Err(e) = ctx.system().force_unmount(path, ctx.sleep_on_unmount()).await {
                tracing::warn!(path = %path.display(), "Failed to unmount: {}", e);
            }
        }
        Ok(())
    }

    fn is_platform_critical(&self, process: &ProcessEntry) -> bool {
        let remount = &self.ctx.config.remount;
        let launcher = process
            .exe
            .as_deref()
            .is_some_and(|exe| exe.starts_with(&remount.app_launcher_exe_prefix));
        process.uid < remount.app_uid_start && !launcher
    }

    /// Rebind the storage view of every process owned by `uid`; returns how many were remounted
    pub async fn remount_uid(&self, uid: u32, mode: RemountMode) -> Result<usize, StorageError> {
        let _registry = self.registry.lock().await;
        let config = &self.ctx.config;
        let processes = &self.ctx.adapters.processes;

        let root_namespace = processes.root_mount_namespace().await?;
        let plan = RemountPlan {
            storage_source: mode.runtime_view().map(|view| config.paths.runtime.join(view)),
            storage_target: config.paths.storage.clone(),
            user_source: config
                .paths
                .user
                .join((uid / config.remount.per_user_range).to_string()),
            self_target: config.paths.storage.join("self"),
        };

        let mut remounted = 0;
        for process in processes.list_processes().await? {
            if process.uid != uid {
                continue;
            }
            let Some(namespace) = process.mount_namespace.as_deref() else {
                continue;
            };
            if namespace == root_namespace {
                tracing::debug!(pid = process.pid, "Skipping process in root mount namespace");
                continue;
            }
            if config.remount.base_image_update && self.is_platform_critical(&process) {
                tracing::debug!(pid = process.pid, "Skipping platform process");
                continue;
            }

            match processes.remount_storage(process.pid, &plan).await {
                Ok(()) => remounted += 1,
                Err(e) => tracing::warn!(pid = process.pid, "Failed to remount storage: {}", e),
            }
        }

        tracing::info!(uid, %mode, remounted, "Remounted storage");
        Ok(remounted)
    }

    pub async fn create_obb(
        &self,
        source_path: &str,
        key_hex: &str,
        owner_gid: u32,
    ) -> Result<String, StorageError> {
        validate_path(source_path)?;
        let key = if key_hex.is_empty() {
            None
        } else {
            validate_hex(key_hex)?;
            Some(hex::decode(key_hex).map_err(|e| StorageError::invalid_input(e.to_string()))?)
        };

        let mut registry = self.registry.lock().await;
        let id = format!("obb:{}", registry.next_obb_id);
        registry.next_obb_id += 1;

        let mut volume = Volume::obb(id.clone(), Path::new(source_path), key, owner_gid);
        if let Err(e) = volume.create(&self.ctx).await {
            destroy_logged(&self.ctx, &mut volume).await;
            return Err(e);
        }
        registry.obbs.push(volume);
        Ok(id)
    }

    pub async fn destroy_obb(&self, volume_id: &str) -> Result<(), StorageError> {
        validate_id(volume_id)?;
        let mut registry = self.registry.lock().await;
        let index = registry
            .obbs
            .iter()
            .position(|v| v.id() == volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        let mut volume = registry.obbs.remove(index);
        volume.destroy(&self.ctx).await
    }

    pub async fn create_stub_volume(
        &self,
        source_path: &str,
        mount_path: &str,
        fs_type: &str,
        fs_uuid: &str,
        fs_label: &str,
    ) -> Result<String, StorageError> {
        validate_path(source_path)?;
        validate_path(mount_path)?;

        let mut registry = self.registry.lock().await;
        let id = format!("stub:{}", registry.next_stub_id);
        registry.next_stub_id += 1;

        let stub = StubVolume::new(
            Path::new(source_path),
            Path::new(mount_path),
            fs_type,
            fs_uuid,
            fs_label,
        );
        let mut volume = Volume::stub(id.clone(), stub);
        volume.create(&self.ctx).await?;
        registry.stubs.push(volume);
        Ok(id)
    }

    pub async fn destroy_stub_volume(&self, volume_id: &str) -> Result<(), StorageError> {
        validate_id(volume_id)?;
        let mut registry = self.registry.lock().await;
        let index = registry
            .stubs
            .iter()
            .position(|v| v.id() == volume_id)
            .ok_or_else(|| volume_not_found(volume_id))?;
        let mut volume = registry.stubs.remove(index);
        volume.destroy(&self.ctx).await
    }

    pub async fn mount_app_fuse(&self, uid: u32, mount_id: u32) -> Result<OwnedFd, StorageError> {
        self.ctx.adapters.appfuse.mount(uid, mount_id).await
    }

    pub async fn unmount_app_fuse(&self, uid: u32, mount_id: u32) -> Result<(), StorageError> {
        self.ctx.adapters.appfuse.unmount(uid, mount_id).await
    }

    pub async fn open_app_fuse_file(
        &self,
        uid: u32,
        mount_id: u32,
        file_id: u32,
        flags: i32,
    ) -> Result<OwnedFd, StorageError> {
        self.ctx
            .adapters
            .appfuse
            .open_file(uid, mount_id, file_id, flags)
            .await
    }

    pub async fn create_user_key(
        &self,
        user_id: u32,
        serial: i32,
        ephemeral: bool,
    ) -> Result<(), StorageError> {
        let _crypto = self.crypto_lock.lock().await;
        self.ctx
            .adapters
            .crypto
            .create_user_key(user_id, serial, ephemeral)
            .await
    }

    pub async fn destroy_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        let _crypto = self.crypto_lock.lock().await;
        self.ctx.adapters.crypto.destroy_user_key(user_id).await
    }

    pub async fn add_user_key_auth(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        validate_optional_hex(token)?;
        validate_optional_hex(secret)?;
        let _crypto = self.crypto_lock.lock().await;
        self.ctx
            .adapters
            .crypto
            .add_user_key_auth(user_id, serial, token, secret)
            .await
    }

    pub async fn unlock_user_key(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        validate_optional_hex(token)?;
        validate_optional_hex(secret)?;
        let _crypto = self.crypto_lock.lock().await;
        self.ctx
            .adapters
            .crypto
            .unlock_user_key(user_id, serial, token, secret)
            .await
    }

    pub async fn lock_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        let _crypto = self.crypto_lock.lock().await;
        self.ctx.adapters.crypto.lock_user_key(user_id).await
    }

    /// Active disks followed by pending ones
    pub async fn list_disks(&self) -> Vec<DiskInfo> {
        let registry = self.registry.lock().await;
        registry
            .disks
            .iter()
            .map(|d| d.info(false))
            .chain(registry.pending_disks.iter().map(|d| d.info(true)))
            .collect()
    }

    pub async fn list_volumes(&self) -> Vec<VolumeInfo> {
        self.registry.lock().await.all_volumes()
    }

    pub async fn volume_info(&self, volume_id: &str) -> Result<VolumeInfo, StorageError> {
        let registry = self.registry.lock().await;
        registry
            .find_volume(volume_id)
            .map(Volume::info)
            .ok_or_else(|| volume_not_found(volume_id))
    }

    pub async fn disk_info(&self, disk_id: &str) -> Result<DiskInfo, StorageError> {
        let registry = self.registry.lock().await;
        registry
            .disks
            .iter()
            .find(|d| d.id() == disk_id)
            .map(|d| d.info(false))
            .or_else(|| {
                registry
                    .pending_disks
                    .iter()
                    .find(|d| d.id() == disk_id)
                    .map(|d| d.info(true))
            })
            .ok_or_else(|| StorageError::not_found(format!("Disk not found: {disk_id}")))
    }

    /// Trim the data path and mounted private volumes in the background
    pub async fn fstrim(&self) -> OperationId {
        let targets = self.resolve_trim_targets().await;
        let operation_id = OperationId::new();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            maintenance::run_pass(&ctx, None, OperationKind::Trim, operation_id, targets).await;
        });
        operation_id
    }

    /// Start the single idle-maintenance pass; `Busy` while one is running
    pub async fn run_idle_maint(&self) -> Result<OperationId, StorageError> {
        self.maintenance.try_begin()?;
        let targets = self.resolve_trim_targets().await;
        let operation_id = OperationId::new();
        let ctx = self.ctx.clone();
        let gate = self.maintenance.clone();
        tokio::spawn(async move {
            maintenance::run_pass(
                &ctx,
                Some(&gate),
                OperationKind::IdleMaintenance,
                operation_id,
                targets,
            )
            .await;
            gate.finish();
        });
        Ok(operation_id)
    }

    pub async fn abort_idle_maint(&self) {
        self.maintenance.abort().await;
    }

    async fn resolve_trim_targets(&self) -> Vec<PathBuf> {
        let registry = self.registry.lock().await;
        registry.trim_targets(&self.ctx.config.maintenance.data_path)
    }
}

fn validate_optional_hex(value: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        Ok(())
    } else {
        validate_hex(value)
    }
}
