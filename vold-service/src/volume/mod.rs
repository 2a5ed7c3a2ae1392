// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle state machine
//!
//! Every volume shares the [`VolumeBase`] record and the five lifecycle
//! verbs on [`Volume`]. The type-specific work is dispatched to the
//! [`VolumeHooks`] implementation of its [`VolumeKind`].
//!
//! Ownership is a strict tree: a volume owns the volumes stacked on it,
//! and stacked volumes are destroyed whenever their parent unmounts.

mod emulated;
mod obb;
mod overlay;
mod private;
mod public;
mod stub;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use vold_contracts::{StorageError, StorageErrorKind, StorageEvent};
use vold_types::{
    DeviceNumber, FsType, MountFlag, MountFlags, VolumeInfo, VolumeState, VolumeType,
};

use crate::context::Context;

pub use emulated::EmulatedVolume;
pub use obb::ObbVolume;
pub use private::PrivateVolume;
pub use public::PublicVolume;
pub use stub::StubVolume;

/// Type-specific halves of the lifecycle verbs
#[async_trait]
pub trait VolumeHooks: Send + Sync {
    async fn do_create(&mut self, _base: &mut VolumeBase, _ctx: &Context) -> Result<(), StorageError> {
        Ok(())
    }

    async fn do_destroy(&mut self, _base: &mut VolumeBase, _ctx: &Context) -> Result<(), StorageError> {
        Ok(())
    }

    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError>;

    async fn do_unmount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError>;

    async fn do_format(
        &mut self,
        base: &mut VolumeBase,
        _ctx: &Context,
        fs_type: FsType,
    ) -> Result<(), StorageError> {
        Err(StorageError::new(
            StorageErrorKind::Unsupported,
            format!("{} volumes cannot be formatted as {fs_type}", base.volume_type),
        ))
    }
}

/// Fields common to every volume
#[derive(Debug)]
pub struct VolumeBase {
    id: String,
    volume_type: VolumeType,
    state: VolumeState,
    created: bool,
    silent: bool,
    disk_id: Option<String>,
    part_guid: Option<String>,
    mount_flags: MountFlags,
    mount_user_id: Option<u32>,
    path: Option<PathBuf>,
    internal_path: Option<PathBuf>,
    fs_type: Option<String>,
    fs_uuid: Option<String>,
    fs_label: Option<String>,
    stacked: Vec<Volume>,
}

impl VolumeBase {
    fn new(id: String, volume_type: VolumeType) -> Self {
        Self {
            id,
            volume_type,
            state: VolumeState::Unmounted,
            created: false,
            silent: false,
            disk_id: None,
            part_guid: None,
            mount_flags: MountFlags::empty(),
            mount_user_id: None,
            path: None,
            internal_path: None,
            fs_type: None,
            fs_uuid: None,
            fs_label: None,
            stacked: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn volume_type(&self) -> VolumeType {
        self.volume_type
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn disk_id(&self) -> Option<&str> {
        self.disk_id.as_deref()
    }

    pub fn part_guid(&self) -> Option<&str> {
        self.part_guid.as_deref()
    }

    pub fn mount_flags(&self) -> MountFlags {
        self.mount_flags
    }

    pub fn mount_user_id(&self) -> Option<u32> {
        self.mount_user_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn internal_path(&self) -> Option<&Path> {
        self.internal_path.as_deref()
    }

    pub fn fs_type(&self) -> Option<&str> {
        self.fs_type.as_deref()
    }

    pub fn fs_uuid(&self) -> Option<&str> {
        self.fs_uuid.as_deref()
    }

    pub fn stacked(&self) -> &[Volume] {
        &self.stacked
    }

    pub fn is_visible(&self) -> bool {
        self.mount_flags.contains(MountFlag::Visible)
    }

    pub fn is_primary(&self) -> bool {
        self.mount_flags.contains(MountFlag::Primary)
    }

    /// Emit `event` unless the volume is silent
    pub(crate) fn notify(&self, ctx: &Context, event: StorageEvent) {
        if !self.silent {
            ctx.notify(event);
        }
    }

    fn set_state(&mut self, ctx: &Context, state: VolumeState) {
        tracing::debug!(volume = %self.id, from = %self.state, to = %state, "Volume state change");
        self.state = state;
        self.notify(
            ctx,
            StorageEvent::VolumeStateChanged {
                volume_id: self.id.clone(),
                state,
            },
        );
    }

    fn require_uncreated(&self, what: &str) -> Result<(), StorageError> {
        if self.created {
            tracing::warn!(volume = %self.id, "{what} can only change before create");
            return Err(StorageError::busy(format!(
                "{what} of {} can only change before create",
                self.id
            )));
        }
        Ok(())
    }

    fn require_idle(&self, what: &str) -> Result<(), StorageError> {
        if !self.state.is_idle() {
            tracing::warn!(volume = %self.id, state = %self.state, "{what} can only change while unmounted");
            return Err(StorageError::busy(format!(
                "{what} of {} can only change while unmounted",
                self.id
            )));
        }
        Ok(())
    }

    fn require_checking(&self, what: &str) -> Result<(), StorageError> {
        if self.state != VolumeState::Checking {
            tracing::warn!(volume = %self.id, state = %self.state, "{what} can only change while checking");
            return Err(StorageError::busy(format!(
                "{what} of {} can only change while checking",
                self.id
            )));
        }
        Ok(())
    }

    pub fn set_disk_id(&mut self, disk_id: &str) -> Result<(), StorageError> {
        self.require_uncreated("disk id")?;
        self.disk_id = Some(disk_id.to_string());
        Ok(())
    }

    pub fn set_part_guid(&mut self, part_guid: &str) -> Result<(), StorageError> {
        self.require_uncreated("partition GUID")?;
        self.part_guid = Some(part_guid.to_string());
        Ok(())
    }

    pub fn set_silent(&mut self, silent: bool) -> Result<(), StorageError> {
        self.require_uncreated("silent flag")?;
        self.silent = silent;
        Ok(())
    }

    pub fn set_mount_flags(&mut self, flags: MountFlags) -> Result<(), StorageError> {
        self.require_idle("mount flags")?;
        self.mount_flags = flags;
        Ok(())
    }

    pub fn set_mount_user_id(&mut self, user_id: Option<u32>) -> Result<(), StorageError> {
        self.require_idle("mount user")?;
        self.mount_user_id = user_id;
        Ok(())
    }

    pub fn set_path(&mut self, ctx: &Context, path: &Path) -> Result<(), StorageError> {
        self.require_checking("path")?;
        self.path = Some(path.to_path_buf());
        self.notify(
            ctx,
            StorageEvent::VolumePathChanged {
                volume_id: self.id.clone(),
                path: path.display().to_string(),
            },
        );
        Ok(())
    }

    pub fn set_internal_path(&mut self, ctx: &Context, path: &Path) -> Result<(), StorageError> {
        self.require_checking("internal path")?;
        self.internal_path = Some(path.to_path_buf());
        self.notify(
            ctx,
            StorageEvent::VolumeInternalPathChanged {
                volume_id: self.id.clone(),
                path: path.display().to_string(),
            },
        );
        Ok(())
    }

    /// Record filesystem metadata read from the device
    pub(crate) fn set_fs_metadata(
        &mut self,
        ctx: &Context,
        fs_type: &str,
        fs_uuid: &str,
        fs_label: &str,
    ) {
        self.fs_type = Some(fs_type.to_string());
        self.fs_uuid = Some(fs_uuid.to_string());
        self.fs_label = Some(fs_label.to_string());
        self.notify(
            ctx,
            StorageEvent::VolumeMetadataChanged {
                volume_id: self.id.clone(),
                fs_type: fs_type.to_string(),
                fs_uuid: fs_uuid.to_string(),
                fs_label: fs_label.to_string(),
            },
        );
    }

    fn clear_paths(&mut self) {
        self.path = None;
        self.internal_path = None;
    }

    /// Attach a child volume, torn down when this volume unmounts
    pub(crate) fn push_stacked(&mut self, volume: Volume) {
        self.stacked.push(volume);
    }
}

/// Closed set of volume variants
pub enum VolumeKind {
    Public(PublicVolume),
    Private(PrivateVolume),
    Emulated(EmulatedVolume),
    Obb(ObbVolume),
    Stub(StubVolume),
}

impl VolumeKind {
    fn hooks(&mut self) -> &mut dyn VolumeHooks {
        match self {
            VolumeKind::Public(v) => v,
            VolumeKind::Private(v) => v,
            VolumeKind::Emulated(v) => v,
            VolumeKind::Obb(v) => v,
            VolumeKind::Stub(v) => v,
        }
    }
}

impl std::fmt::Debug for VolumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VolumeKind::Public(_) => "Public",
            VolumeKind::Private(_) => "Private",
            VolumeKind::Emulated(_) => "Emulated",
            VolumeKind::Obb(_) => "Obb",
            VolumeKind::Stub(_) => "Stub",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Volume {
    base: VolumeBase,
    kind: VolumeKind,
}

impl Volume {
    fn new(id: String, volume_type: VolumeType, kind: VolumeKind) -> Self {
        Self {
            base: VolumeBase::new(id, volume_type),
            kind,
        }
    }

    /// Raw removable filesystem on `device`
    pub fn public(device: DeviceNumber) -> Self {
        Self::new(
            format!("public:{}", device.id_fragment()),
            VolumeType::Public,
            VolumeKind::Public(PublicVolume::new(device)),
        )
    }

    /// Encrypted partition on `device`, unlocked with `key`
    pub fn private(device: DeviceNumber, key: Vec<u8>) -> Self {
        Self::new(
            format!("private:{}", device.id_fragment()),
            VolumeType::Private,
            VolumeKind::Private(PrivateVolume::new(device, key)),
        )
    }

    /// The always-present internal overlay over `raw_path`
    pub fn internal_emulated(raw_path: &Path) -> Self {
        Self::new(
            "emulated".to_string(),
            VolumeType::Emulated,
            VolumeKind::Emulated(EmulatedVolume::new(raw_path, "emulated")),
        )
    }

    /// Overlay stacked over the media directory of a private volume on `device`
    pub fn stacked_emulated(raw_path: &Path, device: DeviceNumber, fs_uuid: &str) -> Self {
        Self::new(
            format!("emulated:{}", device.id_fragment()),
            VolumeType::Emulated,
            VolumeKind::Emulated(EmulatedVolume::new(raw_path, fs_uuid)),
        )
    }

    pub fn obb(id: String, image: &Path, key: Option<Vec<u8>>, owner_gid: u32) -> Self {
        Self::new(
            id,
            VolumeType::Obb,
            VolumeKind::Obb(ObbVolume::new(image, key, owner_gid)),
        )
    }

    pub fn stub(id: String, stub: StubVolume) -> Self {
        Self::new(id, VolumeType::Stub, VolumeKind::Stub(stub))
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn base(&self) -> &VolumeBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut VolumeBase {
        &mut self.base
    }

    pub fn kind(&self) -> &VolumeKind {
        &self.kind
    }

    pub fn state(&self) -> VolumeState {
        self.base.state
    }

    pub async fn create(&mut self, ctx: &Context) -> Result<(), StorageError> {
        if self.base.created {
            tracing::error!(volume = %self.base.id, "Volume created twice");
            return Err(StorageError::internal(format!(
                "volume {} is already created",
                self.base.id
            )));
        }

        self.base.created = true;
        let result = self.kind.hooks().do_create(&mut self.base, ctx).await;
        if let Err(e) = &result {
            tracing::warn!(volume = %self.base.id, "Create hook failed: {}", e);
        }

        self.base.notify(
            ctx,
            StorageEvent::VolumeCreated {
                volume_id: self.base.id.clone(),
                volume_type: self.base.volume_type,
                disk_id: self.base.disk_id.clone(),
                part_guid: self.base.part_guid.clone(),
            },
        );
        self.base.set_state(ctx, VolumeState::Unmounted);
        result
    }

    /// Tear down stacked volumes and this volume, ending in `Removed` or `BadRemoval`
    pub fn destroy<'a>(&'a mut self, ctx: &'a Context) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            if !self.base.created {
                return Err(StorageError::internal(format!(
                    "volume {} was never created",
                    self.base.id
                )));
            }

            if self.base.state == VolumeState::Mounted {
                if let Err(e) = self.unmount(ctx).await {
                    tracing::warn!(volume = %self.base.id, "Unmount during destroy failed: {}", e);
                }
                self.base.set_state(ctx, VolumeState::BadRemoval);
            } else {
                self.base.set_state(ctx, VolumeState::Removed);
            }

            self.base.notify(
                ctx,
                StorageEvent::VolumeDestroyed {
                    volume_id: self.base.id.clone(),
                },
            );
            let result = self.kind.hooks().do_destroy(&mut self.base, ctx).await;
            self.base.created = false;
            result
        })
    }

    pub async fn mount(&mut self, ctx: &Context) -> Result<(), StorageError> {
        if !self.base.state.is_idle() {
            tracing::warn!(volume = %self.base.id, state = %self.base.state, "Mount rejected");
            return Err(StorageError::busy(format!(
                "volume {} is {}",
                self.base.id, self.base.state
            )));
        }

        self.base.set_state(ctx, VolumeState::Checking);
        let result = self.kind.hooks().do_mount(&mut self.base, ctx).await;
        match &result {
            Ok(()) => self.base.set_state(ctx, VolumeState::Mounted),
            Err(e) => {
                tracing::warn!(volume = %self.base.id, "Mount failed: {}", e);
                self.base.set_state(ctx, VolumeState::Unmountable);
            }
        }
        result
    }

    pub async fn unmount(&mut self, ctx: &Context) -> Result<(), StorageError> {
        if self.base.state != VolumeState::Mounted {
            tracing::warn!(volume = %self.base.id, state = %self.base.state, "Unmount rejected");
            return Err(StorageError::busy(format!(
                "volume {} is {}",
                self.base.id, self.base.state
            )));
        }

        self.base.set_state(ctx, VolumeState::Ejecting);

        for mut child in std::mem::take(&mut self.base.stacked) {
            if let Err(e) = child.destroy(ctx).await {
                tracing::warn!(volume = %self.base.id, child = %child.id(), "Failed to destroy stacked volume: {}", e);
            }
        }

        let result = self.kind.hooks().do_unmount(&mut self.base, ctx).await;
        if let Err(e) = &result {
            tracing::warn!(volume = %self.base.id, "Unmount hook failed: {}", e);
        }
        self.base.clear_paths();
        self.base.set_state(ctx, VolumeState::Unmounted);
        result
    }

    pub async fn format(&mut self, ctx: &Context, fs_type: FsType) -> Result<(), StorageError> {
        if self.base.state == VolumeState::Mounted {
            if let Err(e) = self.unmount(ctx).await {
                tracing::warn!(volume = %self.base.id, "Unmount before format failed: {}", e);
            }
        }

        if !self.base.state.is_idle() {
            return Err(StorageError::busy(format!(
                "volume {} is {}",
                self.base.id, self.base.state
            )));
        }

        self.base.set_state(ctx, VolumeState::Formatting);
        let result = self.kind.hooks().do_format(&mut self.base, ctx, fs_type).await;
        if let Err(e) = &result {
            tracing::warn!(volume = %self.base.id, "Format failed: {}", e);
        }
        self.base.set_state(ctx, VolumeState::Unmounted);
        result
    }

    /// This volume or a volume stacked (transitively) on it
    pub fn find(&self, id: &str) -> Option<&Volume> {
        if self.base.id == id {
            return Some(self);
        }
        self.base.stacked.iter().find_map(|v| v.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Volume> {
        if self.base.id == id {
            return Some(self);
        }
        self.base.stacked.iter_mut().find_map(|v| v.find_mut(id))
    }

    pub fn info(&self) -> VolumeInfo {
        let base = &self.base;
        VolumeInfo {
            id: base.id.clone(),
            volume_type: base.volume_type,
            state: base.state,
            disk_id: base.disk_id.clone(),
            part_guid: base.part_guid.clone(),
            mount_flags: base.mount_flags.bits(),
            mount_user_id: base.mount_user_id,
            path: base.path.as_ref().map(|p| p.display().to_string()),
            internal_path: base.internal_path.as_ref().map(|p| p.display().to_string()),
            fs_type: base.fs_type.clone(),
            fs_uuid: base.fs_uuid.clone(),
            fs_label: base.fs_label.clone(),
            stacked: base.stacked.iter().map(|v| v.id().to_string()).collect(),
        }
    }

    /// Snapshot of this volume followed by everything stacked on it
    pub fn collect_info(&self, out: &mut Vec<VolumeInfo>) {
        out.push(self.info());
        for child in &self.base.stacked {
            child.collect_info(out);
        }
    }
}
