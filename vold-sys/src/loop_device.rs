// SPDX-License-Identifier: GPL-3.0-only

//! Loop device attachment through `losetup`

use std::path::{Path, PathBuf};

use vold_contracts::{CommandRunner, StorageError};

pub const LOSETUP: &str = "losetup";

/// Attach `image` to the first free loop device and return its path
pub async fn attach(runner: &dyn CommandRunner, image: &Path) -> Result<PathBuf, StorageError> {
    let args = vec![
        "--find".to_string(),
        "--show".to_string(),
        image.display().to_string(),
    ];
    let output = runner.run(LOSETUP, &args).await?;

    if !output.success() {
        return Err(StorageError::internal(format!(
            "losetup failed for {} with status {}",
            image.display(),
            output.status
        )));
    }

    output
        .stdout
        .iter()
        .map(|line| line.trim())
        .find(|line| line.starts_with("/dev/"))
        .map(PathBuf::from)
        .ok_or_else(|| StorageError::internal("losetup did not report a loop device"))
}

pub async fn detach(runner: &dyn CommandRunner, device: &Path) -> Result<(), StorageError> {
    let args = vec!["--detach".to_string(), device.display().to_string()];
    let output = runner.run(LOSETUP, &args).await?;
    if output.success() {
        Ok(())
    } else {
        Err(StorageError::internal(format!(
            "losetup --detach {} failed with status {}",
            device.display(),
            output.status
        )))
    }
}
