// SPDX-License-Identifier: GPL-3.0-only

//! Daemon configuration loaded from TOML

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vold_types::{DiskFlags, parse_disk_flag};

use crate::disk_source::DiskSource;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/voldd/voldd.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid disk source pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Unknown disk flag {flag:?} for disk source {nickname:?}")]
    UnknownFlag { nickname: String, flag: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub paths: PathsConfig,
    pub overlay: OverlayConfig,
    pub remount: RemountConfig,
    pub unmount: UnmountConfig,
    pub maintenance: MaintenanceConfig,

    /// Treat experimental block majors as SD cards
    pub emulator: bool,

    #[serde(rename = "disk_source")]
    pub disk_sources: Vec<DiskSourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the daemon's own block device nodes
    pub dev_dir: PathBuf,
    pub media_rw: PathBuf,
    pub runtime: PathBuf,
    pub user: PathBuf,
    pub storage: PathBuf,
    pub expand: PathBuf,
    pub obb: PathBuf,
    pub appfuse: PathBuf,
    pub data_media: PathBuf,
    pub key_dir: PathBuf,
    pub sys_root: PathBuf,
    pub loop_max_part: PathBuf,
    pub mmc_perdev_minors: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev/block/vold"),
            media_rw: PathBuf::from("/mnt/media_rw"),
            runtime: PathBuf::from("/mnt/runtime"),
            user: PathBuf::from("/mnt/user"),
            storage: PathBuf::from("/storage"),
            expand: PathBuf::from("/mnt/expand"),
            obb: PathBuf::from("/mnt/obb"),
            appfuse: PathBuf::from("/mnt/appfuse"),
            data_media: PathBuf::from("/data/media"),
            key_dir: PathBuf::from("/data/misc/vold"),
            sys_root: PathBuf::from("/sys"),
            loop_max_part: PathBuf::from("/sys/module/loop/parameters/max_part"),
            mmc_perdev_minors: PathBuf::from("/sys/module/mmcblk/parameters/perdev_minors"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub binary: PathBuf,
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub media_rw_uid: u32,
    pub media_rw_gid: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/system/bin/sdcard"),
            ready_timeout_ms: 5000,
            poll_interval_ms: 50,
            media_rw_uid: 1023,
            media_rw_gid: 1023,
        }
    }
}

impl OverlayConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemountConfig {
    /// First uid of the application range
    pub app_uid_start: u32,
    pub app_launcher_exe_prefix: PathBuf,
    pub base_image_update: bool,
    /// Uids per Android-style user
    pub per_user_range: u32,
}

impl Default for RemountConfig {
    fn default() -> Self {
        Self {
            app_uid_start: 10000,
            app_launcher_exe_prefix: PathBuf::from("/system/bin/app_process"),
            base_image_update: false,
            per_user_range: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnmountConfig {
    pub managed_prefixes: Vec<String>,
    pub excluded_prefixes: Vec<String>,
    pub force_unmount_delay_ms: u64,
}

impl Default for UnmountConfig {
    fn default() -> Self {
        Self {
            managed_prefixes: vec!["/mnt/".to_string(), "/storage/".to_string()],
            excluded_prefixes: vec!["/mnt/vendor".to_string(), "/mnt/product".to_string()],
            force_unmount_delay_ms: 5000,
        }
    }
}

impl UnmountConfig {
    pub fn force_unmount_delay(&self) -> Duration {
        Duration::from_millis(self.force_unmount_delay_ms)
    }

    /// Whether the startup unmount sweep owns `path`
    pub fn is_managed(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.managed_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
            && !self
                .excluded_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub data_path: PathBuf,
    pub step_delay_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/data"),
            step_delay_ms: 1000,
        }
    }
}

impl MaintenanceConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSourceConfig {
    pub sys_pattern: String,
    pub nickname: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        // Surface bad patterns and flags at startup
        config.disk_sources()?;
        Ok(config)
    }

    pub fn disk_sources(&self) -> Result<Vec<DiskSource>, ConfigError> {
        self.disk_sources
            .iter()
            .map(|entry| {
                let mut flags = DiskFlags::empty();
                for name in &entry.flags {
                    let flag = parse_disk_flag(name).ok_or_else(|| ConfigError::UnknownFlag {
                        nickname: entry.nickname.clone(),
                        flag: name.clone(),
                    })?;
                    flags |= flag;
                }

                DiskSource::new(&entry.sys_pattern, &entry.nickname, flags).map_err(|source| {
                    ConfigError::InvalidPattern {
                        pattern: entry.sys_pattern.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vold_types::DiskFlag;

    #[test]
    fn empty_config_uses_defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.overlay.ready_timeout(), Duration::from_secs(5));
        assert_eq!(config.remount.app_uid_start, 10000);
    }

    #[test]
    fn parses_disk_sources_with_flags() {
        let config = DaemonConfig::from_toml_str(
            r#"
            emulator = true

            [[disk_source]]
            sys_pattern = "/devices/platform/*mmc*"
            nickname = "sdcard1"
            flags = ["adoptable", "default_primary"]
            "#,
        )
        .unwrap();

        assert!(config.emulator);
        let sources = config.disk_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].nickname(), "sdcard1");
        assert!(sources[0].flags().contains(DiskFlag::Adoptable | DiskFlag::DefaultPrimary));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_patterns() {
        let unknown = DaemonConfig::from_toml_str(
            "[[disk_source]]\nsys_pattern = \"/x\"\nnickname = \"n\"\nflags = [\"floppy\"]\n",
        );
        assert!(matches!(unknown, Err(ConfigError::UnknownFlag { .. })));

        let pattern = DaemonConfig::from_toml_str(
            "[[disk_source]]\nsys_pattern = \"/x/[\"\nnickname = \"n\"\n",
        );
        assert!(matches!(pattern, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn sweep_prefixes_respect_exclusions() {
        let unmount = UnmountConfig::default();
        assert!(unmount.is_managed(Path::new("/mnt/media_rw/1234-ABCD")));
        assert!(unmount.is_managed(Path::new("/storage/emulated")));
        assert!(!unmount.is_managed(Path::new("/mnt/vendor/persist")));
        assert!(!unmount.is_managed(Path::new("/data")));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = DaemonConfig::load(Path::new("/nonexistent/voldd.toml")).unwrap();
        assert_eq!(config.paths.dev_dir, PathBuf::from("/dev/block/vold"));
    }
}
