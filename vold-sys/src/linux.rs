// SPDX-License-Identifier: GPL-3.0-only

//! [`SystemOps`] backed by the running kernel

use std::fs::{self, File};
use std::io::{ErrorKind, Seek, SeekFrom};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use nix::mount::{MntFlags, MsFlags};
use nix::sys::signal::Signal;
use nix::sys::stat::{makedev, Mode, SFlag};
use vold_contracts::{StorageError, SystemOps};
use vold_types::{DeviceNumber, MountOption, MountOptions, MountRequest};

use crate::process_finder::{find_processes_using_path, signal_processes};
use crate::{mounts, Result, SysError};

const ESCALATION: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL];

#[derive(Debug, Clone)]
pub struct LinuxSystem {
    /// Pause between kill-signal escalation steps
    unmount_delay: Duration,
}

impl LinuxSystem {
    pub fn new(unmount_delay: Duration) -> Self {
        Self { unmount_delay }
    }

    async fn pause(&self, sleep: bool) {
        if sleep && !self.unmount_delay.is_zero() {
            tokio::time::sleep(self.unmount_delay).await;
        }
    }

    async fn holders(path: &Path) -> Result<Vec<i32>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || find_processes_using_path(&path))
            .await
            .map_err(|e| SysError::OperationFailed(format!("process scan task failed: {e}")))
    }
}

impl Default for LinuxSystem {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

pub fn ms_flags(options: MountOptions) -> MsFlags {
    let mut flags = MsFlags::empty();
    for option in options.iter() {
        flags |= match option {
            MountOption::ReadOnly => MsFlags::MS_RDONLY,
            MountOption::NoSuid => MsFlags::MS_NOSUID,
            MountOption::NoDev => MsFlags::MS_NODEV,
            MountOption::NoExec => MsFlags::MS_NOEXEC,
            MountOption::NoAtime => MsFlags::MS_NOATIME,
            MountOption::DirSync => MsFlags::MS_DIRSYNC,
        };
    }
    flags
}

/// `umount2` that treats "not mounted" and "missing" as success
fn try_unmount(path: &Path) -> Result<bool> {
    match nix::mount::umount2(path, MntFlags::UMOUNT_NOFOLLOW) {
        Ok(()) => Ok(true),
        Err(nix::Error::EINVAL) | Err(nix::Error::ENOENT) => Ok(true),
        Err(nix::Error::EBUSY) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SystemOps for LinuxSystem {
    async fn create_device_node(
        &self,
        path: &Path,
        device: DeviceNumber,
    ) -> std::result::Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let dev = makedev(u64::from(device.major), u64::from(device.minor));
        nix::sys::stat::mknod(path, SFlag::S_IFBLK, Mode::from_bits_truncate(0o600), dev)
            .map_err(SysError::from)?;
        tracing::debug!(path = %path.display(), %device, "Created device node");
        Ok(())
    }

    async fn destroy_device_node(&self, path: &Path) -> std::result::Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn block_device_size(&self, path: &Path) -> std::result::Result<u64, StorageError> {
        let mut file = File::open(path)?;
        Ok(file.seek(SeekFrom::End(0))?)
    }

    async fn read_sysfs_attr(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<String>, StorageError> {
        match fs::read_to_string(path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn prepare_dir(
        &self,
        path: &Path,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> std::result::Result<(), StorageError> {
        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> std::result::Result<(), StorageError> {
        match fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mount(&self, request: &MountRequest) -> std::result::Result<(), StorageError> {
        let data = (!request.data.is_empty()).then_some(request.data.as_str());
        nix::mount::mount(
            Some(request.source.as_path()),
            request.target.as_path(),
            Some(request.fs_type.as_str()),
            ms_flags(request.options),
            data,
        )
        .map_err(SysError::from)?;

        tracing::debug!(
            source = %request.source.display(),
            target = %request.target.display(),
            fs_type = %request.fs_type,
            "Mounted filesystem"
        );
        Ok(())
    }

    async fn force_unmount(&self, path: &Path, sleep: bool) -> std::result::Result<(), StorageError> {
        if try_unmount(path)? {
            return Ok(());
        }

        for signal in ESCALATION {
            tracing::warn!(path = %path.display(), ?signal, "Unmount busy, signalling holders");
            self.pause(sleep).await;
            let pids = Self::holders(path).await?;
            signal_processes(&pids, signal);

            if try_unmount(path)? {
                return Ok(());
            }
        }

        self.pause(sleep).await;
        if try_unmount(path)? {
            return Ok(());
        }

        Err(StorageError::busy(format!(
            "{} is still busy after killing holders",
            path.display()
        )))
    }

    async fn kill_processes_using_path(
        &self,
        path: &Path,
        sleep: bool,
    ) -> std::result::Result<usize, StorageError> {
        let mut total = 0;
        for signal in ESCALATION {
            let pids = Self::holders(path).await?;
            if pids.is_empty() {
                break;
            }
            total += signal_processes(&pids, signal);
            self.pause(sleep).await;
        }
        Ok(total)
    }

    async fn device_id(&self, path: &Path) -> std::result::Result<u64, StorageError> {
        Ok(fs::metadata(path)?.dev())
    }

    async fn mount_points(&self) -> std::result::Result<Vec<PathBuf>, StorageError> {
        let entries = mounts::read_mount_table()?;
        Ok(entries.into_iter().map(|entry| entry.mount_point).collect())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> std::result::Result<(), StorageError> {
        match fs::remove_file(link) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_options_translate_to_ms_flags() {
        let flags = ms_flags(MountOption::NoSuid | MountOption::NoDev | MountOption::ReadOnly);
        assert!(flags.contains(MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_RDONLY));
        assert!(!flags.contains(MsFlags::MS_NOEXEC));
    }

    #[tokio::test]
    async fn sysfs_attr_missing_is_none() {
        let system = LinuxSystem::new(Duration::ZERO);
        let value = system
            .read_sysfs_attr(Path::new("/sys/nonexistent-attr-12345"))
            .await
            .expect("missing attribute is not an error");
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn symlink_replaces_existing_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("primary");
        let system = LinuxSystem::new(Duration::ZERO);

        system.symlink(Path::new("/storage/a"), &link).await.unwrap();
        system.symlink(Path::new("/storage/b"), &link).await.unwrap();

        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/storage/b"));
    }

    #[tokio::test]
    async fn remove_dir_ignores_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let system = LinuxSystem::new(Duration::ZERO);
        system.remove_dir(&dir.path().join("gone")).await.unwrap();
    }
}
