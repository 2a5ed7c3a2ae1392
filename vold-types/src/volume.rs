//! Volume data models

use std::fmt;

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

/// Closed set of volume variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// Raw removable filesystem
    Public,
    /// Encrypted partition wrapped by the crypto backend
    Private,
    /// FUSE permission overlay over a backing path
    Emulated,
    /// Loopback container image
    Obb,
    /// Externally managed bookkeeping volume
    Stub,
}

impl VolumeType {
    /// Prefix used when building volume ids
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Emulated => "emulated",
            Self::Obb => "obb",
            Self::Stub => "stub",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_prefix())
    }
}

/// Lifecycle state of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Unmounted,
    Checking,
    Mounted,
    /// Reserved; no lifecycle verb currently reaches it
    MountedReadOnly,
    Formatting,
    Ejecting,
    /// The last mount attempt failed
    Unmountable,
    Removed,
    BadRemoval,
}

impl VolumeState {
    /// Stable numeric code reported to control-plane listeners
    pub fn code(self) -> i32 {
        match self {
            Self::Unmounted => 0,
            Self::Checking => 1,
            Self::Mounted => 2,
            Self::MountedReadOnly => 3,
            Self::Formatting => 4,
            Self::Ejecting => 5,
            Self::Unmountable => 6,
            Self::Removed => 7,
            Self::BadRemoval => 8,
        }
    }

    /// States from which `mount` and `format` may start
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Unmounted | Self::Unmountable)
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmounted => "unmounted",
            Self::Checking => "checking",
            Self::Mounted => "mounted",
            Self::MountedReadOnly => "mounted_read_only",
            Self::Formatting => "formatting",
            Self::Ejecting => "ejecting",
            Self::Unmountable => "unmountable",
            Self::Removed => "removed",
            Self::BadRemoval => "bad_removal",
        };
        f.write_str(name)
    }
}

/// Mount-time flags requested by the control plane
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountFlag {
    /// Volume backs primary shared storage
    Primary = 1 << 0,

    /// Volume is visible to apps through the permission overlay
    Visible = 1 << 1,
}

pub type MountFlags = BitFlags<MountFlag>;

/// Snapshot of a volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: String,
    pub volume_type: VolumeType,
    pub state: VolumeState,
    pub disk_id: Option<String>,
    pub part_guid: Option<String>,

    /// Raw [`MountFlags`] bits
    pub mount_flags: u32,
    pub mount_user_id: Option<u32>,

    /// Externally visible path
    pub path: Option<String>,

    /// Path of the raw (pre-overlay) mount
    pub internal_path: Option<String>,

    pub fs_type: Option<String>,
    pub fs_uuid: Option<String>,
    pub fs_label: Option<String>,

    /// Ids of volumes stacked on this one
    pub stacked: Vec<String>,
}

impl VolumeInfo {
    pub fn mount_flags(&self) -> MountFlags {
        MountFlags::from_bits_truncate(self.mount_flags)
    }
}
