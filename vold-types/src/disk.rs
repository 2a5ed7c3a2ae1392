//! Disk data models
//!
//! These types describe a physical block device managed by the daemon.

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

/// Capability and media-class flags of a disk
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskFlag {
    /// Media may be adopted as encrypted private storage
    Adoptable = 1 << 0,

    /// Media should become the primary shared storage by default
    DefaultPrimary = 1 << 1,

    /// SD card
    Sd = 1 << 2,

    /// USB mass storage
    Usb = 1 << 3,

    /// Embedded MMC
    Emmc = 1 << 4,
}

pub type DiskFlags = BitFlags<DiskFlag>;

/// Parse a configuration flag name into a [`DiskFlag`]
pub fn parse_disk_flag(name: &str) -> Option<DiskFlag> {
    match name.trim().to_ascii_lowercase().as_str() {
        "adoptable" | "encryptable" => Some(DiskFlag::Adoptable),
        "default_primary" | "defaultprimary" => Some(DiskFlag::DefaultPrimary),
        "sd" => Some(DiskFlag::Sd),
        "usb" => Some(DiskFlag::Usb),
        "emmc" => Some(DiskFlag::Emmc),
        _ => None,
    }
}

/// Snapshot of a managed disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskInfo {
    /// Disk identifier (e.g. "disk:8,16")
    pub id: String,

    /// Kernel sysfs path of the device
    pub sys_path: String,

    /// Source nickname from the matching disk source
    pub nickname: String,

    /// Total size in bytes (0 when unknown)
    pub size: u64,

    /// Human readable label derived from bus/vendor metadata
    pub label: String,

    /// Raw [`DiskFlags`] bits
    pub flags: u32,

    /// Ids of volumes parsed from the partition table
    pub volumes: Vec<String>,

    /// Whether the disk is held back from scanning by the keyguard gate
    pub pending: bool,
}

impl DiskInfo {
    pub fn flags(&self) -> DiskFlags {
        DiskFlags::from_bits_truncate(self.flags)
    }

    pub fn is_adoptable(&self) -> bool {
        self.flags().contains(DiskFlag::Adoptable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configuration_flag_names() {
        assert_eq!(parse_disk_flag("adoptable"), Some(DiskFlag::Adoptable));
        assert_eq!(parse_disk_flag(" Default_Primary "), Some(DiskFlag::DefaultPrimary));
        assert_eq!(parse_disk_flag("floppy"), None);
    }

    #[test]
    fn disk_info_flags_roundtrip_through_bits() {
        let flags = DiskFlag::Adoptable | DiskFlag::Sd;
        let info = DiskInfo {
            id: "disk:179,0".to_string(),
            sys_path: "/sys/devices/platform/mmc1/block/mmcblk1".to_string(),
            nickname: "sdcard1".to_string(),
            size: 0,
            label: String::new(),
            flags: flags.bits(),
            volumes: vec![],
            pending: false,
        };

        assert!(info.is_adoptable());
        assert!(info.flags().contains(DiskFlag::Sd));
        assert!(!info.flags().contains(DiskFlag::Usb));
    }
}
