// SPDX-License-Identifier: GPL-3.0-only

//! Permission overlay views shared by public and emulated volumes

use std::path::{Path, PathBuf};

use tokio::time::Instant;
use vold_contracts::{OverlayHandle, OverlayRequest, StorageError, StorageErrorKind};

use crate::context::Context;

const VIEWS: [&str; 4] = ["default", "read", "write", "full"];

/// The four runtime mount points the overlay daemon serves for one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OverlayViews {
    paths: Vec<PathBuf>,
}

impl OverlayViews {
    pub(crate) fn new(runtime: &Path, label: &str) -> Self {
        Self {
            paths: VIEWS.iter().map(|view| runtime.join(view).join(label)).collect(),
        }
    }

    /// Mount points in teardown order
    pub(crate) fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The view whose device id flips once the overlay is serving
    fn full(&self) -> &Path {
        &self.paths[VIEWS.len() - 1]
    }
}

/// A running overlay process and the views it serves
#[derive(Debug)]
pub(crate) struct RunningOverlay {
    pub(crate) views: OverlayViews,
    pub(crate) handle: OverlayHandle,
}

/// Spawn the overlay daemon and wait until it serves `views`
pub(crate) async fn start(
    ctx: &Context,
    views: OverlayViews,
    request: &OverlayRequest,
) -> Result<RunningOverlay, StorageError> {
    let system = ctx.system();
    for path in views.paths() {
        system.prepare_dir(path, 0o700, 0, 0).await?;
    }

    let before = system.device_id(views.full()).await?;
    let handle = ctx.adapters.overlay.spawn(request).await?;
    tracing::debug!(label = %request.label, pid = ?handle.pid, "Spawned overlay");

    let config = &ctx.config.overlay;
    let deadline = Instant::now() + config.ready_timeout();
    loop {
        match system.device_id(views.full()).await {
            Ok(current) if current != before => break,
            Ok(_) => {}
            Err(e) => tracing::debug!(label = %request.label, "Polling overlay view failed: {}", e),
        }

        if Instant::now() >= deadline {
            tracing::warn!(label = %request.label, "Timed out waiting for overlay");
            if let Err(e) = ctx.adapters.overlay.stop(handle).await {
                tracing::warn!(label = %request.label, "Failed to stop overlay: {}", e);
            }
            return Err(StorageError::new(
                StorageErrorKind::Timeout,
                format!("overlay for {} did not become ready", request.label),
            ));
        }
        tokio::time::sleep(config.poll_interval()).await;
    }

    Ok(RunningOverlay { views, handle })
}

/// Best-effort ordered teardown: holders, overlay, views, then the raw mount
pub(crate) async fn teardown(
    ctx: &Context,
    visible_path: Option<&Path>,
    overlay: Option<RunningOverlay>,
    raw_path: Option<&Path>,
) {
    let system = ctx.system();
    let sleep = ctx.sleep_on_unmount();

    for path in visible_path.into_iter().chain(raw_path) {
        if let Err(e) = system.kill_processes_using_path(path, sleep).await {
            tracing::warn!(path = %path.display(), "Failed to kill path holders: {}", e);
        }
    }

    if let Some(overlay) = &overlay {
        if let Err(e) = ctx.adapters.overlay.stop(overlay.handle).await {
            tracing::warn!(pid = ?overlay.handle.pid, "Failed to stop overlay: {}", e);
        }
    }

    let views = overlay.as_ref().map(|o| o.views.paths()).unwrap_or_default();
    for path in views.iter().map(PathBuf::as_path).chain(raw_path) {
        if let Err(e) = system.force_unmount(path, sleep).await {
            tracing::warn!(path = %path.display(), "Failed to unmount: {}", e);
        }
    }
    for path in views.iter().map(PathBuf::as_path).chain(raw_path) {
        if let Err(e) = system.remove_dir(path).await {
            tracing::warn!(path = %path.display(), "Failed to remove mount point: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_are_ordered_for_teardown() {
        let views = OverlayViews::new(Path::new("/mnt/runtime"), "1234-ABCD");
        let names: Vec<_> = views.paths().iter().map(|p| p.display().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "/mnt/runtime/default/1234-ABCD",
                "/mnt/runtime/read/1234-ABCD",
                "/mnt/runtime/write/1234-ABCD",
                "/mnt/runtime/full/1234-ABCD",
            ]
        );
        assert_eq!(views.full(), Path::new("/mnt/runtime/full/1234-ABCD"));
    }
}
