// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem metadata probing through `blkid`

use std::path::Path;

use vold_contracts::{CommandRunner, StorageError, StorageErrorKind};

pub const BLKID: &str = "blkid";

/// blkid exits 2 when the device carries no recognisable signature
const BLKID_NOT_FOUND: i32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsMetadata {
    pub fs_type: String,
    pub fs_uuid: String,
    pub fs_label: String,
}

pub fn blkid_args(device: &Path) -> Vec<String> {
    vec![
        "-c".to_string(),
        "/dev/null".to_string(),
        "-o".to_string(),
        "export".to_string(),
        device.display().to_string(),
    ]
}

/// Parse `blkid -o export` output; `None` when no filesystem type is reported
pub fn parse_blkid_export(lines: &[String]) -> Option<FsMetadata> {
    let mut metadata = FsMetadata::default();

    for line in lines {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "TYPE" => metadata.fs_type = value.to_string(),
            "UUID" => metadata.fs_uuid = value.to_string(),
            "LABEL" => metadata.fs_label = value.to_string(),
            _ => {}
        }
    }

    if metadata.fs_type.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

/// Probe `device`. `Ok(None)` means the device holds no known filesystem.
pub async fn read_metadata(
    runner: &dyn CommandRunner,
    device: &Path,
) -> Result<Option<FsMetadata>, StorageError> {
    let output = runner.run(BLKID, &blkid_args(device)).await?;

    match output.status {
        0 => Ok(parse_blkid_export(&output.stdout)),
        BLKID_NOT_FOUND => Ok(None),
        status => Err(StorageError::new(
            StorageErrorKind::Internal,
            format!("blkid failed on {} with status {status}", device.display()),
        )),
    }
}
