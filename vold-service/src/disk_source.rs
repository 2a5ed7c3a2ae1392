// SPDX-License-Identifier: GPL-3.0-only

//! Static predicates deciding which block devices become managed disks

use glob::Pattern;
use vold_types::DiskFlags;

#[derive(Debug, Clone)]
pub struct DiskSource {
    pattern: Pattern,
    nickname: String,
    flags: DiskFlags,
}

impl DiskSource {
    pub fn new(
        sys_pattern: &str,
        nickname: &str,
        flags: DiskFlags,
    ) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Pattern::new(sys_pattern)?,
            nickname: nickname.to_string(),
            flags,
        })
    }

    /// Whether the kernel DEVPATH of a device falls under this source.
    /// `*` also matches `/`.
    pub fn matches(&self, sys_path: &str) -> bool {
        self.pattern.matches(sys_path)
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn flags(&self) -> DiskFlags {
        self.flags
    }
}
