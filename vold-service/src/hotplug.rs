// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use vold_service::VolumeManager;
use vold_sys::UeventSocket;
use vold_sys::uevent::coldboot;

/// Feed kernel block uevents to the manager, starting with a coldboot scan
pub(crate) fn monitor_block_events(manager: Arc<VolumeManager>) -> Result<()> {
    tracing::info!("Starting block hotplug monitoring");

    // Subscribe before the coldboot scan so no event slips between the two
    let socket = UeventSocket::open()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("uevent".to_string())
        .spawn(move || {
            loop {
                match socket.next_event() {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to receive uevent: {}", e);
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        })?;

    let sys_root = manager.context().config.paths.sys_root.clone();
    tokio::spawn(async move {
        let present = coldboot(&sys_root);
        tracing::debug!("Coldboot found {} block devices", present.len());
        for event in &present {
            manager.handle_block_event(event).await;
        }

        while let Some(event) = rx.recv().await {
            tracing::debug!(action = ?event.action, path = %event.event_path, "Block event");
            manager.handle_block_event(&event).await;
        }
        tracing::warn!("Block event stream ended");
    });

    Ok(())
}
