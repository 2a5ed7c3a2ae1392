// SPDX-License-Identifier: GPL-3.0-only

//! `/proc/self/mountinfo` parsing

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use crate::{Result, SysError};

/// One row of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

pub fn read_mount_table() -> Result<Vec<MountEntry>> {
    let mount_info = fs::read_to_string("/proc/self/mountinfo")?;
    parse_mount_info(&mount_info)
}

/// Parse mountinfo rows in kernel order (parents before the mounts stacked on them)
pub fn parse_mount_info(input: &str) -> Result<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || SysError::Parse {
            tool: "mountinfo",
            line: line.to_string(),
        };

        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;
        let mount_point = left.split_whitespace().nth(4).ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let source = right_fields.next().unwrap_or_default();

        entries.push(MountEntry {
            mount_point: PathBuf::from(OsString::from_vec(unescape_mount_field(mount_point))),
            fs_type: fs_type.to_string(),
            source: String::from_utf8_lossy(&unescape_mount_field(source)).into_owned(),
        });
    }

    Ok(entries)
}

/// Decode the kernel's `\ooo` octal escapes back into raw bytes
fn unescape_mount_field(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 4 <= bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let num = digits
                    .iter()
                    .fold(0u16, |acc, digit| acc * 8 + u16::from(digit - b'0'));
                if let Ok(byte) = u8::try_from(num) {
                    output.push(byte);
                    index += 4;
                    continue;
                }
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    output
}
