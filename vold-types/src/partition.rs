//! Partition table constants and layouts

use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// GPT "Microsoft basic data" type, carried by public shares
pub const GPT_BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";

/// GPT type of the small metadata partition written by mixed/private layouts
pub const GPT_ANDROID_META: &str = "19A710A2-B3CA-11E4-B075-10604B889DCF";

/// GPT type of an adopted (encrypted, private) partition
pub const GPT_ANDROID_EXPAND: &str = "193D1EA4-B3CA-11E4-B075-10604B889DCF";

/// MBR type codes that are exposed as public volumes
pub const MBR_PUBLIC_TYPES: [u8; 5] = [
    0x06, // FAT16
    0x07, // HPFS/NTFS/exFAT
    0x0b, // W95 FAT32
    0x0c, // W95 FAT32 (LBA)
    0x0e, // W95 FAT16 (LBA)
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTableType {
    Mbr,
    Gpt,
    Unknown,
}

/// Layout written by a destructive repartition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionLayout {
    Public,
    Private,
    Mixed,
}

impl FromStr for PartitionLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "mixed" => Ok(Self::Mixed),
            other => Err(anyhow!("Unknown partition layout: {}", other)),
        }
    }
}

/// Normalise a GUID to lowercase hex without separators
///
/// Returns `None` unless the input is exactly 32 hex digits once dashes are removed.
pub fn normalize_guid(guid: &str) -> Option<String> {
    let hex: String = guid
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dashed_guid() {
        assert_eq!(
            normalize_guid("193D1EA4-B3CA-11E4-B075-10604B889DCF").as_deref(),
            Some("193d1ea4b3ca11e4b07510604b889dcf")
        );
    }

    #[test]
    fn rejects_short_or_non_hex_guid() {
        assert!(normalize_guid("1234").is_none());
        assert!(normalize_guid("zz3d1ea4-b3ca-11e4-b075-10604b889dcf").is_none());
    }
}
