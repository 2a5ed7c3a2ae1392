// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vold_contracts::{OverlayRequest, StorageError};

use super::overlay::{self, OverlayViews, RunningOverlay};
use super::{VolumeBase, VolumeHooks};
use crate::context::Context;

/// Permission overlay over a plain backing directory
#[derive(Debug)]
pub struct EmulatedVolume {
    raw_path: PathBuf,
    label: String,
    overlay: Option<RunningOverlay>,
}

impl EmulatedVolume {
    pub(super) fn new(raw_path: &Path, label: &str) -> Self {
        Self {
            raw_path: raw_path.to_path_buf(),
            label: label.to_string(),
            overlay: None,
        }
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl VolumeHooks for EmulatedVolume {
    async fn do_mount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let paths = &ctx.config.paths;
        let media = &ctx.config.overlay;

        base.set_internal_path(ctx, &self.raw_path)?;
        base.set_path(ctx, &paths.storage.join(&self.label))?;

        let request = OverlayRequest {
            source: self.raw_path.clone(),
            label: self.label.clone(),
            uid: media.media_rw_uid,
            gid: media.media_rw_gid,
            user_id: base.mount_user_id().unwrap_or(0),
            full_write: true,
            multi_user: true,
        };
        let views = OverlayViews::new(&paths.runtime, &self.label);
        self.overlay = Some(overlay::start(ctx, views, &request).await?);
        Ok(())
    }

    async fn do_unmount(&mut self, base: &mut VolumeBase, ctx: &Context) -> Result<(), StorageError> {
        let visible = base.path().map(PathBuf::from);
        overlay::teardown(ctx, visible.as_deref(), self.overlay.take(), None).await;
        Ok(())
    }
}
