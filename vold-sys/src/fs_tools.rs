// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem check, format and mount parameters for the supported filesystems

use std::collections::BTreeSet;
use std::path::Path;

use vold_contracts::{CommandRunner, StorageError, StorageErrorKind};
use vold_types::{Filesystem, MountOption, MountOptions, MountRequest};

/// fsck passes allowed when the checker asks for a re-run
const MAX_CHECK_PASSES: usize = 3;

/// Result of one filesystem-check pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Clean,
    /// Repairs were made and the checker wants another pass
    Recheck,
    Failed,
}

struct Tools {
    check: &'static str,
    format: &'static str,
}

fn tools(fs: Filesystem) -> Tools {
    match fs {
        Filesystem::Vfat => Tools {
            check: "fsck.vfat",
            format: "mkfs.vfat",
        },
        Filesystem::Exfat => Tools {
            check: "fsck.exfat",
            format: "mkfs.exfat",
        },
        Filesystem::Ext4 => Tools {
            check: "e2fsck",
            format: "mke2fs",
        },
        Filesystem::F2fs => Tools {
            check: "fsck.f2fs",
            format: "mkfs.f2fs",
        },
    }
}

/// Filesystems whose check and format tools are both installed
pub fn detect_supported() -> BTreeSet<Filesystem> {
    Filesystem::ALL
        .into_iter()
        .filter(|fs| {
            let t = tools(*fs);
            let present = which::which(t.check).is_ok() && which::which(t.format).is_ok();
            if !present {
                tracing::info!(filesystem = %fs, "Filesystem tools not installed");
            }
            present
        })
        .collect()
}

pub fn check_command(fs: Filesystem, device: &Path) -> (&'static str, Vec<String>) {
    let dev = device.display().to_string();
    let args = match fs {
        Filesystem::Vfat => vec!["-p".to_string(), "-f".to_string(), dev],
        Filesystem::Exfat => vec!["-y".to_string(), dev],
        Filesystem::Ext4 => vec!["-y".to_string(), "-f".to_string(), dev],
        Filesystem::F2fs => vec!["-a".to_string(), dev],
    };
    (tools(fs).check, args)
}

pub fn interpret_check_status(fs: Filesystem, status: i32) -> CheckOutcome {
    match (fs, status) {
        (_, 0) => CheckOutcome::Clean,
        (Filesystem::Vfat, 1) => CheckOutcome::Recheck,
        (Filesystem::Exfat, 1) => CheckOutcome::Clean,
        // e2fsck: 1 corrected, 2 corrected and a reboot is advised
        (Filesystem::Ext4, 1) | (Filesystem::Ext4, 2) => CheckOutcome::Clean,
        _ => CheckOutcome::Failed,
    }
}

pub fn format_command(fs: Filesystem, device: &Path) -> (&'static str, Vec<String>) {
    let dev = device.display().to_string();
    let args = match fs {
        Filesystem::Vfat => vec!["-F".to_string(), "32".to_string(), dev],
        Filesystem::Exfat => vec!["-n".to_string(), "android".to_string(), dev],
        Filesystem::Ext4 => vec![
            "-F".to_string(),
            "-t".to_string(),
            "ext4".to_string(),
            "-b".to_string(),
            "4096".to_string(),
            dev,
        ],
        Filesystem::F2fs => vec!["-f".to_string(), "-d1".to_string(), dev],
    };
    (tools(fs).format, args)
}

pub fn wipe_command(device: &Path) -> (&'static str, Vec<String>) {
    ("wipefs", vec!["-a".to_string(), device.display().to_string()])
}

pub fn fstrim_command(path: &Path) -> (&'static str, Vec<String>) {
    ("fstrim", vec!["-v".to_string(), path.display().to_string()])
}

/// Mount of a portable (FAT family) filesystem owned by `uid:gid` with permission mask `mask`
pub fn portable_mount_request(
    fs: Filesystem,
    source: &Path,
    target: &Path,
    uid: u32,
    gid: u32,
    mask: u32,
) -> MountRequest {
    let mut data = format!("uid={uid},gid={gid},fmask={mask:o},dmask={mask:o}");
    if fs == Filesystem::Vfat {
        data.push_str(",utf8,shortname=mixed");
    }

    MountRequest {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        fs_type: fs.as_str().to_string(),
        options: MountOption::NoSuid | MountOption::NoDev | MountOption::NoExec | MountOption::DirSync,
        data,
    }
}

/// Mount of an adoptable (native) filesystem
pub fn native_mount_request(fs: Filesystem, source: &Path, target: &Path) -> MountRequest {
    let mut options: MountOptions =
        MountOption::NoAtime | MountOption::NoDev | MountOption::NoSuid;
    if fs == Filesystem::Ext4 {
        options |= MountOption::DirSync;
    }

    MountRequest {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        fs_type: fs.as_str().to_string(),
        options,
        data: String::new(),
    }
}

/// Run the checker, repeating while it asks for another pass
pub async fn check(
    runner: &dyn CommandRunner,
    fs: Filesystem,
    device: &Path,
) -> Result<(), StorageError> {
    let (program, args) = check_command(fs, device);

    for pass in 1..=MAX_CHECK_PASSES {
        let output = runner.run(program, &args).await?;
        match interpret_check_status(fs, output.status) {
            CheckOutcome::Clean => {
                tracing::debug!(device = %device.display(), filesystem = %fs, pass, "Filesystem check passed");
                return Ok(());
            }
            CheckOutcome::Recheck => {
                tracing::info!(device = %device.display(), filesystem = %fs, pass, "Filesystem modified, rechecking");
            }
            CheckOutcome::Failed => {
                return Err(StorageError::internal(format!(
                    "{program} failed on {} with status {}",
                    device.display(),
                    output.status
                )));
            }
        }
    }

    Err(StorageError::internal(format!(
        "{program} still reports changes on {} after {MAX_CHECK_PASSES} passes",
        device.display()
    )))
}

pub async fn format(
    runner: &dyn CommandRunner,
    fs: Filesystem,
    device: &Path,
) -> Result<(), StorageError> {
    let (program, args) = format_command(fs, device);
    let output = runner.run(program, &args).await?;
    if output.success() {
        Ok(())
    } else {
        Err(StorageError::internal(format!(
            "{program} failed on {} with status {}",
            device.display(),
            output.status
        )))
    }
}

/// Erase filesystem signatures. Failures are logged only.
pub async fn wipe(runner: &dyn CommandRunner, device: &Path) {
    let (program, args) = wipe_command(device);
    match runner.run(program, &args).await {
        Ok(output) if output.success() => {}
        Ok(output) => {
            tracing::warn!(device = %device.display(), status = output.status, "Failed to wipe device")
        }
        Err(e) => tracing::warn!(device = %device.display(), "Failed to wipe device: {}", e),
    }
}

pub async fn trim(runner: &dyn CommandRunner, path: &Path) -> Result<(), StorageError> {
    let (program, args) = fstrim_command(path);
    let output = runner.run(program, &args).await?;
    if output.success() {
        Ok(())
    } else {
        Err(StorageError::new(
            StorageErrorKind::Internal,
            format!("fstrim failed on {} with status {}", path.display(), output.status),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfat_recheck_and_failure_statuses() {
        assert_eq!(interpret_check_status(Filesystem::Vfat, 0), CheckOutcome::Clean);
        assert_eq!(interpret_check_status(Filesystem::Vfat, 1), CheckOutcome::Recheck);
        assert_eq!(interpret_check_status(Filesystem::Vfat, 8), CheckOutcome::Failed);
    }

    #[test]
    fn e2fsck_corrections_count_as_clean() {
        assert_eq!(interpret_check_status(Filesystem::Ext4, 1), CheckOutcome::Clean);
        assert_eq!(interpret_check_status(Filesystem::Ext4, 2), CheckOutcome::Clean);
        assert_eq!(interpret_check_status(Filesystem::Ext4, 4), CheckOutcome::Failed);
    }

    #[test]
    fn format_commands_end_with_device() {
        let dev = Path::new("/dev/block/vold/public:8,1");
        for fs in Filesystem::ALL {
            let (_, args) = format_command(fs, dev);
            assert_eq!(args.last().map(String::as_str), Some("/dev/block/vold/public:8,1"));
        }
    }

    #[test]
    fn portable_mount_data_carries_owner_and_mask() {
        let request = portable_mount_request(
            Filesystem::Vfat,
            Path::new("/dev/x"),
            Path::new("/mnt/media_rw/X"),
            1023,
            1023,
            0o007,
        );
        assert!(request.data.starts_with("uid=1023,gid=1023,fmask=7,dmask=7"));
        assert!(request.options.contains(MountOption::NoExec));
    }
}
