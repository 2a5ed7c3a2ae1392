// SPDX-License-Identifier: GPL-3.0-only

//! Launcher for the FUSE permission overlay daemon

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use vold_contracts::{OverlayHandle, OverlayLauncher, OverlayRequest, StorageError};

use crate::SysError;

#[derive(Debug, Clone)]
pub struct SdcardLauncher {
    binary: PathBuf,
}

impl SdcardLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

pub fn overlay_args(request: &OverlayRequest) -> Vec<String> {
    let mut args = vec![
        "-u".to_string(),
        request.uid.to_string(),
        "-g".to_string(),
        request.gid.to_string(),
        "-U".to_string(),
        request.user_id.to_string(),
    ];
    if request.multi_user {
        args.push("-m".to_string());
    }
    if request.full_write {
        args.push("-w".to_string());
    }
    args.push(request.source.display().to_string());
    args.push(request.label.clone());
    args
}

#[async_trait]
impl OverlayLauncher for SdcardLauncher {
    async fn spawn(&self, request: &OverlayRequest) -> Result<OverlayHandle, StorageError> {
        let args = overlay_args(request);
        tracing::debug!(binary = %self.binary.display(), ?args, "Spawning overlay");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SysError::Spawn {
                program: self.binary.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let label = request.label.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(%label, %status, "Overlay exited"),
                Err(e) => tracing::warn!(%label, "Failed to reap overlay: {}", e),
            }
        });

        Ok(OverlayHandle { pid })
    }

    async fn stop(&self, handle: OverlayHandle) -> Result<(), StorageError> {
        let Some(pid) = handle.pid else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::Error::ESRCH) => Ok(()),
            Err(e) => Err(SysError::from(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_end_with_source_and_label() {
        let request = OverlayRequest {
            source: PathBuf::from("/mnt/media_rw/1234-ABCD"),
            label: "1234-ABCD".to_string(),
            uid: 1023,
            gid: 1023,
            user_id: 0,
            full_write: true,
            multi_user: false,
        };
        let args = overlay_args(&request);
        assert!(args.contains(&"-w".to_string()));
        assert!(!args.contains(&"-m".to_string()));
        assert_eq!(&args[args.len() - 2..], ["/mnt/media_rw/1234-ABCD", "1234-ABCD"]);
    }
}
