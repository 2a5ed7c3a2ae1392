// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use vold_types::{VolumeState, VolumeType};

use super::OperationEvent;

/// Notification delivered to the control-plane listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum StorageEvent {
    DiskCreated {
        disk_id: String,
        flags: u32,
    },
    DiskMetadataChanged {
        disk_id: String,
        size: u64,
        label: String,
        sys_path: String,
    },
    DiskScanned {
        disk_id: String,
    },
    DiskDestroyed {
        disk_id: String,
    },
    VolumeCreated {
        volume_id: String,
        volume_type: VolumeType,
        disk_id: Option<String>,
        part_guid: Option<String>,
    },
    VolumeStateChanged {
        volume_id: String,
        state: VolumeState,
    },
    VolumeMetadataChanged {
        volume_id: String,
        fs_type: String,
        fs_uuid: String,
        fs_label: String,
    },
    VolumePathChanged {
        volume_id: String,
        path: String,
    },
    VolumeInternalPathChanged {
        volume_id: String,
        path: String,
    },
    VolumeDestroyed {
        volume_id: String,
    },
    Operation(OperationEvent),
}

impl StorageEvent {
    /// Short name used as the signal discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DiskCreated { .. } => "disk_created",
            Self::DiskMetadataChanged { .. } => "disk_metadata_changed",
            Self::DiskScanned { .. } => "disk_scanned",
            Self::DiskDestroyed { .. } => "disk_destroyed",
            Self::VolumeCreated { .. } => "volume_created",
            Self::VolumeStateChanged { .. } => "volume_state_changed",
            Self::VolumeMetadataChanged { .. } => "volume_metadata_changed",
            Self::VolumePathChanged { .. } => "volume_path_changed",
            Self::VolumeInternalPathChanged { .. } => "volume_internal_path_changed",
            Self::VolumeDestroyed { .. } => "volume_destroyed",
            Self::Operation(_) => "operation",
        }
    }

    /// Volume the event refers to, if it is a volume event
    pub fn volume_id(&self) -> Option<&str> {
        match self {
            Self::VolumeCreated { volume_id, .. }
            | Self::VolumeStateChanged { volume_id, .. }
            | Self::VolumeMetadataChanged { volume_id, .. }
            | Self::VolumePathChanged { volume_id, .. }
            | Self::VolumeInternalPathChanged { volume_id, .. }
            | Self::VolumeDestroyed { volume_id } => Some(volume_id),
            _ => None,
        }
    }

    /// Disk the event refers to, if it is a disk event
    pub fn disk_id(&self) -> Option<&str> {
        match self {
            Self::DiskCreated { disk_id, .. }
            | Self::DiskMetadataChanged { disk_id, .. }
            | Self::DiskScanned { disk_id }
            | Self::DiskDestroyed { disk_id } => Some(disk_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_serializes_with_tag() {
        let event = StorageEvent::VolumeStateChanged {
            volume_id: "public:8,1".to_string(),
            state: VolumeState::BadRemoval,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"volume_state_changed\""));
        assert!(json.contains("\"bad_removal\""));
        assert_eq!(event.volume_id(), Some("public:8,1"));
        assert_eq!(event.disk_id(), None);
    }
}
