//! Kernel device numbers and block hotplug events

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// A kernel block device number (major/minor pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

impl DeviceNumber {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The device number of the `index`-th partition of this whole-disk device
    pub fn partition(&self, index: u32) -> Self {
        Self {
            major: self.major,
            minor: self.minor + index,
        }
    }

    /// Identifier fragment used in disk and volume ids (e.g. `8,16`)
    pub fn id_fragment(&self) -> String {
        format!("{},{}", self.major, self.minor)
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for DeviceNumber {
    type Err = anyhow::Error;

    /// Parses the sysfs `dev` attribute form, `major:minor`.
    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid device number: {}", s))?;
        Ok(Self {
            major: major.parse()?,
            minor: minor.parse()?,
        })
    }
}

/// Hotplug action reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockAction {
    Add,
    Change,
    Remove,
}

impl FromStr for BlockAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "change" => Ok(Self::Change),
            "remove" => Ok(Self::Remove),
            other => Err(anyhow!("Unsupported block action: {}", other)),
        }
    }
}

/// A block-subsystem hotplug notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub action: BlockAction,

    /// Kernel DEVPATH of the device (e.g. `/devices/pci0000:00/.../block/sdb`)
    pub event_path: String,

    pub device: DeviceNumber,

    /// `disk` or `partition`
    pub dev_type: String,

    /// Kernel name (e.g. `sdb`), when reported
    pub dev_name: Option<String>,
}

impl BlockEvent {
    pub fn is_disk(&self) -> bool {
        self.dev_type == "disk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sysfs_dev_attribute() {
        let dev: DeviceNumber = "179:32\n".parse().unwrap();
        assert_eq!(dev, DeviceNumber::new(179, 32));
        assert_eq!(dev.partition(2).id_fragment(), "179,34");
    }

    #[test]
    fn rejects_malformed_device_number() {
        assert!("17932".parse::<DeviceNumber>().is_err());
        assert!("a:b".parse::<DeviceNumber>().is_err());
    }
}
