// SPDX-License-Identifier: GPL-3.0-only

//! App-provided FUSE mounts under the appfuse root

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use nix::mount::{MntFlags, MsFlags};
use vold_contracts::{AppFuseBridge, StorageError};

use crate::SysError;

#[derive(Debug, Clone)]
pub struct LinuxAppFuse {
    root: PathBuf,
}

impl LinuxAppFuse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn mount_path(&self, uid: u32, mount_id: u32) -> PathBuf {
        self.root.join(format!("{uid}_{mount_id}"))
    }
}

#[async_trait]
impl AppFuseBridge for LinuxAppFuse {
    async fn mount(&self, uid: u32, mount_id: u32) -> Result<OwnedFd, StorageError> {
        let target = self.mount_path(uid, mount_id);
        fs::create_dir_all(&target)?;

        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open("/dev/fuse")?;

        let data = format!(
            "fd={},rootmode=40000,default_permissions,allow_other,user_id={uid},group_id={uid}",
            device.as_raw_fd()
        );
        nix::mount::mount(
            Some("/dev/fuse"),
            &target,
            Some("fuse"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOATIME,
            Some(data.as_str()),
        )
        .map_err(SysError::from)?;

        tracing::info!(uid, mount_id, path = %target.display(), "Mounted appfuse");
        Ok(OwnedFd::from(device))
    }

    async fn unmount(&self, uid: u32, mount_id: u32) -> Result<(), StorageError> {
        let target = self.mount_path(uid, mount_id);
        match nix::mount::umount2(&target, MntFlags::MNT_DETACH) {
            Ok(()) | Err(nix::Error::EINVAL) | Err(nix::Error::ENOENT) => {}
            Err(e) => return Err(SysError::from(e).into()),
        }
        match fs::remove_dir(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_file(
        &self,
        uid: u32,
        mount_id: u32,
        file_id: u32,
        flags: i32,
    ) -> Result<OwnedFd, StorageError> {
        let path = self.mount_path(uid, mount_id).join(file_id.to_string());
        let access = flags & libc::O_ACCMODE;

        let file = OpenOptions::new()
            .read(access == libc::O_RDONLY || access == libc::O_RDWR)
            .write(access == libc::O_WRONLY || access == libc::O_RDWR)
            .custom_flags((flags & !libc::O_ACCMODE) | libc::O_CLOEXEC)
            .open(&path)?;
        Ok(OwnedFd::from(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_file_respects_access_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = LinuxAppFuse::new(dir.path());
        let mount_dir = bridge.mount_path(10001, 3);
        fs::create_dir_all(&mount_dir).unwrap();
        fs::write(mount_dir.join("5"), b"payload").unwrap();

        let fd = bridge.open_file(10001, 3, 5, libc::O_RDONLY).await.unwrap();
        let mut file = std::fs::File::from(fd);
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
        assert_eq!(contents, "payload");

        assert!(bridge.open_file(10001, 3, 6, libc::O_RDONLY).await.is_err());
    }
}
