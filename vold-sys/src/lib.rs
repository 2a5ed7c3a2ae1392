// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the volume daemon
//!
//! This crate provides the Linux implementations of the collaborator
//! contracts in `vold-contracts`, plus the parsers and argument builders
//! for the external tools the daemon drives:
//! - mount/unmount/mknod/directory primitives and path-holder killing
//! - `blkid`, `sgdisk`, `losetup`, fsck/mkfs and `fstrim`
//! - dm-crypt mappings and per-user keys
//! - the FUSE overlay daemon and AppFuse mounts
//! - per-process storage remounts and kernel uevents
//!
//! These operations require elevated privileges and should only be called
//! from the daemon itself.

pub mod appfuse;
pub mod blkid;
pub mod command;
pub mod crypto;
pub mod error;
pub mod fs_tools;
pub mod linux;
pub mod loop_device;
pub mod mounts;
pub mod overlay;
pub mod process_finder;
pub mod procs;
pub mod sgdisk;
pub mod uevent;

pub use appfuse::LinuxAppFuse;
pub use blkid::FsMetadata;
pub use command::SystemCommandRunner;
pub use crypto::DmCryptBackend;
pub use error::{Result, SysError};
pub use linux::LinuxSystem;
pub use overlay::SdcardLauncher;
pub use procs::ProcfsProcessTable;
pub use sgdisk::{DumpedPartition, PartitionDump, PartitionType};
pub use uevent::UeventSocket;
