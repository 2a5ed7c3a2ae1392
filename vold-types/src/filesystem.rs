//! Filesystem kinds understood by the daemon

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Concrete on-disk filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filesystem {
    Vfat,
    Exfat,
    Ext4,
    F2fs,
}

impl Filesystem {
    pub const ALL: [Filesystem; 4] = [Self::Vfat, Self::Exfat, Self::Ext4, Self::F2fs];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vfat => "vfat",
            Self::Exfat => "exfat",
            Self::Ext4 => "ext4",
            Self::F2fs => "f2fs",
        }
    }

    /// Filesystems a public (portable) volume can carry
    pub fn is_portable(self) -> bool {
        matches!(self, Self::Vfat | Self::Exfat)
    }

    /// Filesystems a private (adopted) volume can carry
    pub fn is_adoptable(self) -> bool {
        matches!(self, Self::Ext4 | Self::F2fs)
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filesystem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vfat" | "fat" | "fat32" => Ok(Self::Vfat),
            "exfat" => Ok(Self::Exfat),
            "ext4" => Ok(Self::Ext4),
            "f2fs" => Ok(Self::F2fs),
            other => Err(anyhow!("Unsupported filesystem: {}", other)),
        }
    }
}

/// Filesystem requested for a format, `auto` letting the volume decide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsType {
    Auto,
    Explicit(Filesystem),
}

impl FromStr for FsType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        Ok(Self::Explicit(s.parse()?))
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Explicit(fs) => fs.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auto_and_explicit_types() {
        assert_eq!("auto".parse::<FsType>().unwrap(), FsType::Auto);
        assert_eq!("".parse::<FsType>().unwrap(), FsType::Auto);
        assert_eq!(
            "EXFAT".parse::<FsType>().unwrap(),
            FsType::Explicit(Filesystem::Exfat)
        );
        assert!("ntfs".parse::<FsType>().is_err());
    }

    #[test]
    fn supported_sets_order_by_declaration() {
        let set: std::collections::BTreeSet<_> =
            [Filesystem::F2fs, Filesystem::Vfat, Filesystem::Ext4].into_iter().collect();
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec![Filesystem::Vfat, Filesystem::Ext4, Filesystem::F2fs]
        );
    }

    #[test]
    fn portable_and_adoptable_sets_are_disjoint() {
        for fs in Filesystem::ALL {
            assert_ne!(fs.is_portable(), fs.is_adoptable(), "{fs}");
        }
    }
}
