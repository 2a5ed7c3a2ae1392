// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the volume daemon
//!
//! This crate defines the single source of truth for the daemon's storage
//! domain types. They are used throughout the stack:
//!
//! - **vold-sys**: parses tool output into these types
//! - **vold-contracts**: carries them across collaborator and event boundaries
//! - **vold-service**: drives the disk/volume state machines with them
//!
//! ## Architecture
//!
//! - `DiskInfo` → physical disk snapshot
//! - `VolumeInfo` → logical volume snapshot, including the ids of stacked volumes
//! - `BlockEvent` → kernel hotplug notification for a block device

pub mod common;
pub mod device;
pub mod disk;
pub mod filesystem;
pub mod mount;
pub mod partition;
pub mod volume;

pub use common::pretty_size;
pub use device::{BlockAction, BlockEvent, DeviceNumber};
pub use disk::{DiskFlag, DiskFlags, DiskInfo, parse_disk_flag};
pub use filesystem::{Filesystem, FsType};
pub use mount::{MountOption, MountOptions, MountRequest, RemountMode};
pub use partition::{
    GPT_ANDROID_EXPAND, GPT_ANDROID_META, GPT_BASIC_DATA, MBR_PUBLIC_TYPES, PartitionLayout,
    PartitionTableType, normalize_guid,
};
pub use volume::{MountFlag, MountFlags, VolumeInfo, VolumeState, VolumeType};
