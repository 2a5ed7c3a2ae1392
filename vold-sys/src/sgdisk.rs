// SPDX-License-Identifier: GPL-3.0-only

//! Partition table dumps and table-writing arguments for `sgdisk`

use std::path::Path;

use vold_types::{PartitionTableType, GPT_ANDROID_EXPAND, GPT_ANDROID_META, GPT_BASIC_DATA};

pub const SGDISK: &str = "sgdisk";

/// Size of the metadata partition written ahead of the private partition
pub const META_PARTITION_MB: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionType {
    /// MBR system id byte
    Mbr(u8),
    Gpt { type_guid: String, part_guid: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedPartition {
    pub index: u32,
    pub kind: PartitionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDump {
    pub table: PartitionTableType,
    pub partitions: Vec<DumpedPartition>,
}

impl Default for PartitionDump {
    fn default() -> Self {
        Self {
            table: PartitionTableType::Unknown,
            partitions: Vec::new(),
        }
    }
}

pub fn dump_args(device: &Path) -> Vec<String> {
    vec!["--android-dump".to_string(), device.display().to_string()]
}

/// Parse the line report of `sgdisk --android-dump`
///
/// ```text
/// DISK gpt
/// PART 1 EBD0A0A2-B9E5-4433-87C0-68B6B72699C7 5C2F51E4-...
/// ```
///
/// MBR rows carry a hex system id instead of the GUID pair. Malformed rows are skipped.
pub fn parse_android_dump(lines: &[String]) -> PartitionDump {
    let mut dump = PartitionDump::default();

    for line in lines {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("DISK") => {
                dump.table = match tokens.next() {
                    Some("mbr") => PartitionTableType::Mbr,
                    Some("gpt") => PartitionTableType::Gpt,
                    _ => PartitionTableType::Unknown,
                };
            }
            Some("PART") => {
                let Some(index) = tokens.next().and_then(|t| t.parse::<u32>().ok()) else {
                    tracing::warn!(%line, "Skipping partition row without index");
                    continue;
                };

                let kind = match dump.table {
                    PartitionTableType::Mbr => {
                        match tokens.next().and_then(|t| u8::from_str_radix(t, 16).ok()) {
                            Some(code) => PartitionType::Mbr(code),
                            None => {
                                tracing::warn!(%line, "Skipping MBR row without type code");
                                continue;
                            }
                        }
                    }
                    PartitionTableType::Gpt => match (tokens.next(), tokens.next()) {
                        (Some(type_guid), part_guid) => PartitionType::Gpt {
                            type_guid: type_guid.to_string(),
                            part_guid: part_guid.unwrap_or_default().to_string(),
                        },
                        (None, _) => {
                            tracing::warn!(%line, "Skipping GPT row without type GUID");
                            continue;
                        }
                    },
                    PartitionTableType::Unknown => {
                        tracing::warn!(%line, "Partition row before table type");
                        continue;
                    }
                };

                dump.partitions.push(DumpedPartition { index, kind });
            }
            _ => {}
        }
    }

    dump
}

pub fn zap_args(device: &Path) -> Vec<String> {
    vec!["--zap-all".to_string(), device.display().to_string()]
}

/// Single FAT32 partition covering the whole device, converted to MBR
pub fn public_table_args(device: &Path) -> Vec<String> {
    vec![
        "--new=0:0:-0".to_string(),
        "--typecode=0:0c00".to_string(),
        "--gpttombr=1".to_string(),
        device.display().to_string(),
    ]
}

/// Optional public share, metadata partition, then private remainder tagged `part_guid`
pub fn mixed_table_args(device: &Path, public_mb: Option<u64>, part_guid: &str) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(size_mb) = public_mb {
        args.push(format!("--new=0:0:+{size_mb}M"));
        args.push(format!("--typecode=0:{GPT_BASIC_DATA}"));
        args.push("--change-name=0:shared".to_string());
    }

    args.push(format!("--new=0:0:+{META_PARTITION_MB}M"));
    args.push(format!("--typecode=0:{GPT_ANDROID_META}"));
    args.push("--change-name=0:android_meta".to_string());

    args.push("--new=0:0:-0".to_string());
    args.push(format!("--typecode=0:{GPT_ANDROID_EXPAND}"));
    args.push(format!("--partition-guid=0:{part_guid}"));
    args.push("--change-name=0:android_expand".to_string());

    args.push(device.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_mbr_dump() {
        let dump = parse_android_dump(&lines("DISK mbr\nPART 1 c\nPART 2 83\n"));
        assert_eq!(dump.table, PartitionTableType::Mbr);
        assert_eq!(
            dump.partitions,
            vec![
                DumpedPartition { index: 1, kind: PartitionType::Mbr(0x0c) },
                DumpedPartition { index: 2, kind: PartitionType::Mbr(0x83) },
            ]
        );
    }

    #[test]
    fn parses_gpt_dump_with_guid_pairs() {
        let dump = parse_android_dump(&lines(
            "DISK gpt\nPART 3 193D1EA4-B3CA-11E4-B075-10604B889DCF 11111111-2222-3333-4444-555555555555\n",
        ));
        assert_eq!(dump.table, PartitionTableType::Gpt);
        assert_eq!(dump.partitions.len(), 1);
        assert_eq!(dump.partitions[0].index, 3);
        assert_eq!(
            dump.partitions[0].kind,
            PartitionType::Gpt {
                type_guid: GPT_ANDROID_EXPAND.to_string(),
                part_guid: "11111111-2222-3333-4444-555555555555".to_string(),
            }
        );
    }

    #[test]
    fn skips_malformed_rows_and_unknown_tables() {
        let dump = parse_android_dump(&lines("PART 1 c\nDISK gpt\nPART x\nnoise\n"));
        assert_eq!(dump.table, PartitionTableType::Gpt);
        assert!(dump.partitions.is_empty());

        let dump = parse_android_dump(&lines("DISK loop\n"));
        assert_eq!(dump.table, PartitionTableType::Unknown);
    }

    #[test]
    fn mixed_layout_without_share_has_two_partitions() {
        let args = mixed_table_args(Path::new("/dev/block/vold/disk:8,0"), None, "abc");
        assert_eq!(args.iter().filter(|a| a.starts_with("--new=")).count(), 2);
        assert_eq!(args.last().map(String::as_str), Some("/dev/block/vold/disk:8,0"));
        assert!(args.contains(&"--partition-guid=0:abc".to_string()));
    }

    #[test]
    fn mixed_layout_with_share_leads_with_public_partition() {
        let args = mixed_table_args(Path::new("/dev/x"), Some(2048), "abc");
        assert_eq!(args[0], "--new=0:0:+2048M");
        assert_eq!(args[1], format!("--typecode=0:{GPT_BASIC_DATA}"));
    }
}
