//! Mount requests and per-process storage visibility modes

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

/// Generic mount(2) flags used by the daemon
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountOption {
    ReadOnly = 1 << 0,
    NoSuid = 1 << 1,
    NoDev = 1 << 2,
    NoExec = 1 << 3,
    NoAtime = 1 << 4,
    DirSync = 1 << 5,
}

pub type MountOptions = BitFlags<MountOption>;

/// A single filesystem mount to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fs_type: String,
    pub options: MountOptions,

    /// Filesystem specific data string (e.g. `uid=1023,gid=1023`)
    pub data: String,
}

/// Storage view granted to a process by `remount_uid`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemountMode {
    None,
    Default,
    Read,
    Write,
    Full,
}

impl RemountMode {
    /// Name of the runtime overlay view backing this mode, if any
    pub fn runtime_view(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Default => Some("default"),
            Self::Read => Some("read"),
            Self::Write => Some("write"),
            Self::Full => Some("full"),
        }
    }
}

impl FromStr for RemountMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "default" => Ok(Self::Default),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "full" => Ok(Self::Full),
            other => Err(anyhow!("Unknown remount mode: {}", other)),
        }
    }
}

impl fmt::Display for RemountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.runtime_view().unwrap_or("none"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remount_modes_map_to_runtime_views() {
        assert_eq!("none".parse::<RemountMode>().unwrap().runtime_view(), None);
        assert_eq!(
            "WRITE".parse::<RemountMode>().unwrap().runtime_view(),
            Some("write")
        );
        assert!("everything".parse::<RemountMode>().is_err());
    }
}
