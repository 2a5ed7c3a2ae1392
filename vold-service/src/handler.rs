// SPDX-License-Identifier: GPL-3.0-only

//! D-Bus control plane for the volume manager
//!
//! Snapshots are returned as JSON strings. Every [`StorageEvent`] is
//! re-emitted as a `StorageEvent(kind, payload)` signal.

use std::sync::Arc;

use tokio::sync::mpsc;
use vold_contracts::{EventListener, StorageError, StorageEvent};
use vold_service::VolumeManager;
use vold_service::error::ServiceError;
use vold_types::{MountFlags, PartitionLayout, RemountMode};
use zbus::object_server::SignalEmitter;
use zbus::{Connection, fdo, interface, zvariant};

pub const OBJECT_PATH: &str = "/org/vold/VolumeManager";

fn failed(err: StorageError) -> fdo::Error {
    ServiceError::from(err).into()
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| {
        tracing::error!("Failed to serialize response: {e}");
        ServiceError::from(e).into()
    })
}

fn invalid(e: anyhow::Error) -> fdo::Error {
    fdo::Error::InvalidArgs(e.to_string())
}

pub struct VolumeManagerHandler {
    manager: Arc<VolumeManager>,
}

impl VolumeManagerHandler {
    pub fn new(manager: Arc<VolumeManager>) -> Self {
        Self { manager }
    }
}

#[interface(name = "org.vold.VolumeManager")]
impl VolumeManagerHandler {
    /// Emitted for every disk, volume and background operation event
    ///
    /// Args:
    /// - kind: event name (e.g. "volume_state_changed")
    /// - payload: JSON-serialized StorageEvent
    #[zbus(signal)]
    pub(crate) async fn storage_event(
        signal_ctxt: &SignalEmitter<'_>,
        kind: &str,
        payload: &str,
    ) -> zbus::Result<()>;

    /// Mount a volume. `user_id` of -1 means no owning user.
    async fn mount(&self, volume_id: String, flags: u32, user_id: i32) -> fdo::Result<()> {
        tracing::debug!("Mount called for {volume_id} (flags {flags:#x}, user {user_id})");
        let user_id = u32::try_from(user_id).ok();
        self.manager
            .mount(&volume_id, MountFlags::from_bits_truncate(flags), user_id)
            .await
            .map_err(failed)
    }

    async fn unmount(&self, volume_id: String) -> fdo::Result<()> {
        self.manager.unmount(&volume_id).await.map_err(failed)
    }

    async fn format(&self, volume_id: String, fs_type: String) -> fdo::Result<()> {
        self.manager.format(&volume_id, &fs_type).await.map_err(failed)
    }

    /// Repartition a disk as "public", "private" or "mixed" (with `ratio` percent public)
    async fn partition(&self, disk_id: String, layout: String, ratio: u32) -> fdo::Result<()> {
        let layout: PartitionLayout = layout.parse().map_err(invalid)?;
        self.manager
            .partition(&disk_id, layout, u64::from(ratio))
            .await
            .map_err(failed)
    }

    async fn forget_partition(&self, part_guid: String, fs_uuid: String) -> fdo::Result<()> {
        self.manager
            .forget_partition(&part_guid, &fs_uuid)
            .await
            .map_err(failed)
    }

    async fn on_user_added(&self, user_id: u32, serial: i32) {
        self.manager.on_user_added(user_id, serial).await;
    }

    async fn on_user_removed(&self, user_id: u32) {
        self.manager.on_user_removed(user_id).await;
    }

    async fn on_user_started(&self, user_id: u32) -> fdo::Result<()> {
        self.manager.on_user_started(user_id).await.map_err(failed)
    }

    async fn on_user_stopped(&self, user_id: u32) {
        self.manager.on_user_stopped(user_id).await;
    }

    async fn on_secure_keyguard_state_changed(&self, showing: bool) {
        self.manager.on_secure_keyguard_state_changed(showing).await;
    }

    async fn reset(&self) -> fdo::Result<()> {
        self.manager.reset().await.map_err(failed)
    }

    async fn shutdown(&self) -> fdo::Result<()> {
        self.manager.shutdown().await.map_err(failed)
    }

    /// Returns the number of processes whose storage view was rebound
    async fn remount_uid(&self, uid: u32, mode: String) -> fdo::Result<u32> {
        let mode: RemountMode = mode.parse().map_err(invalid)?;
        let remounted = self.manager.remount_uid(uid, mode).await.map_err(failed)?;
        Ok(u32::try_from(remounted).unwrap_or(u32::MAX))
    }

    async fn create_obb(
        &self,
        source_path: String,
        key_hex: String,
        owner_gid: u32,
    ) -> fdo::Result<String> {
        self.manager
            .create_obb(&source_path, &key_hex, owner_gid)
            .await
            .map_err(failed)
    }

    async fn destroy_obb(&self, volume_id: String) -> fdo::Result<()> {
        self.manager.destroy_obb(&volume_id).await.map_err(failed)
    }

    async fn create_stub_volume(
        &self,
        source_path: String,
        mount_path: String,
        fs_type: String,
        fs_uuid: String,
        fs_label: String,
    ) -> fdo::Result<String> {
        self.manager
            .create_stub_volume(&source_path, &mount_path, &fs_type, &fs_uuid, &fs_label)
            .await
            .map_err(failed)
    }

    async fn destroy_stub_volume(&self, volume_id: String) -> fdo::Result<()> {
        self.manager
            .destroy_stub_volume(&volume_id)
            .await
            .map_err(failed)
    }

    async fn mount_app_fuse(&self, uid: u32, mount_id: u32) -> fdo::Result<zvariant::OwnedFd> {
        let fd = self
            .manager
            .mount_app_fuse(uid, mount_id)
            .await
            .map_err(failed)?;
        Ok(zvariant::OwnedFd::from(fd))
    }

    async fn unmount_app_fuse(&self, uid: u32, mount_id: u32) -> fdo::Result<()> {
        self.manager
            .unmount_app_fuse(uid, mount_id)
            .await
            .map_err(failed)
    }

    async fn open_app_fuse_file(
        &self,
        uid: u32,
        mount_id: u32,
        file_id: u32,
        flags: i32,
    ) -> fdo::Result<zvariant::OwnedFd> {
        let fd = self
            .manager
            .open_app_fuse_file(uid, mount_id, file_id, flags)
            .await
            .map_err(failed)?;
        Ok(zvariant::OwnedFd::from(fd))
    }

    async fn create_user_key(&self, user_id: u32, serial: i32, ephemeral: bool) -> fdo::Result<()> {
        self.manager
            .create_user_key(user_id, serial, ephemeral)
            .await
            .map_err(failed)
    }

    async fn destroy_user_key(&self, user_id: u32) -> fdo::Result<()> {
        self.manager.destroy_user_key(user_id).await.map_err(failed)
    }

    async fn add_user_key_auth(
        &self,
        user_id: u32,
        serial: i32,
        token: String,
        secret: String,
    ) -> fdo::Result<()> {
        self.manager
            .add_user_key_auth(user_id, serial, &token, &secret)
            .await
            .map_err(failed)
    }

    async fn unlock_user_key(
        &self,
        user_id: u32,
        serial: i32,
        token: String,
        secret: String,
    ) -> fdo::Result<()> {
        self.manager
            .unlock_user_key(user_id, serial, &token, &secret)
            .await
            .map_err(failed)
    }

    async fn lock_user_key(&self, user_id: u32) -> fdo::Result<()> {
        self.manager.lock_user_key(user_id).await.map_err(failed)
    }

    /// Start a background trim; returns the operation id
    async fn fstrim(&self) -> String {
        self.manager.fstrim().await.to_string()
    }

    async fn run_idle_maint(&self) -> fdo::Result<String> {
        let operation_id = self.manager.run_idle_maint().await.map_err(failed)?;
        Ok(operation_id.to_string())
    }

    async fn abort_idle_maint(&self) {
        self.manager.abort_idle_maint().await;
    }

    /// JSON array of DiskInfo, pending disks included
    async fn list_disks(&self) -> fdo::Result<String> {
        to_json(&self.manager.list_disks().await)
    }

    /// JSON array of VolumeInfo, stacked volumes included
    async fn list_volumes(&self) -> fdo::Result<String> {
        to_json(&self.manager.list_volumes().await)
    }

    async fn get_volume_info(&self, volume_id: String) -> fdo::Result<String> {
        let info = self.manager.volume_info(&volume_id).await.map_err(failed)?;
        to_json(&info)
    }

    async fn get_disk_info(&self, disk_id: String) -> fdo::Result<String> {
        let info = self.manager.disk_info(&disk_id).await.map_err(failed)?;
        to_json(&info)
    }
}

/// Listener that queues events for the signal task
pub struct SignalForwarder {
    tx: mpsc::UnboundedSender<StorageEvent>,
}

impl EventListener for SignalForwarder {
    fn on_event(&self, event: &StorageEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(kind = event.kind(), "Signal task gone, dropping event");
        }
    }
}

/// Install a listener on the manager that re-emits events as D-Bus signals
pub async fn forward_events(
    connection: &Connection,
    manager: &VolumeManager,
) -> anyhow::Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, VolumeManagerHandler>(OBJECT_PATH)
        .await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<StorageEvent>();
    manager.set_listener(Some(Arc::new(SignalForwarder { tx })));

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if let Err(e) = VolumeManagerHandler::storage_event(
                iface_ref.signal_emitter(),
                event.kind(),
                &payload,
            )
            .await
            {
                tracing::error!("Failed to emit StorageEvent signal: {}", e);
            }
        }
    });
    Ok(())
}
