// SPDX-License-Identifier: GPL-3.0-only

//! Shared collaborators and settings handed to disks and volumes

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use vold_contracts::{
    AppFuseBridge, CommandRunner, CryptoBackend, EventListener, OverlayLauncher, ProcessTable,
    StorageEvent, SystemOps,
};
use vold_types::Filesystem;

use crate::config::DaemonConfig;
use crate::keys::KeyStore;

/// Collaborator implementations, one per concern
#[derive(Clone)]
pub struct Adapters {
    pub commands: Arc<dyn CommandRunner>,
    pub system: Arc<dyn SystemOps>,
    pub crypto: Arc<dyn CryptoBackend>,
    pub overlay: Arc<dyn OverlayLauncher>,
    pub processes: Arc<dyn ProcessTable>,
    pub appfuse: Arc<dyn AppFuseBridge>,
}

/// Optional control-plane listener
#[derive(Default)]
pub struct Notifier {
    listener: RwLock<Option<Arc<dyn EventListener>>>,
}

impl Notifier {
    pub fn set_listener(&self, listener: Option<Arc<dyn EventListener>>) {
        match self.listener.write() {
            Ok(mut slot) => *slot = listener,
            Err(poisoned) => *poisoned.into_inner() = listener,
        }
    }

    pub fn notify(&self, event: &StorageEvent) {
        let listener = match self.listener.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(listener) = listener {
            listener.on_event(event);
        }
    }
}

pub struct Context {
    pub adapters: Adapters,
    pub config: DaemonConfig,
    pub keys: KeyStore,
    pub notifier: Notifier,
    supported_filesystems: BTreeSet<Filesystem>,
    sleep_on_unmount: AtomicBool,
}

impl Context {
    pub fn new(
        adapters: Adapters,
        config: DaemonConfig,
        supported_filesystems: BTreeSet<Filesystem>,
    ) -> Self {
        let keys = KeyStore::new(&config.paths.key_dir);
        Self {
            adapters,
            config,
            keys,
            notifier: Notifier::default(),
            supported_filesystems,
            sleep_on_unmount: AtomicBool::new(true),
        }
    }

    pub fn supports(&self, fs: Filesystem) -> bool {
        self.supported_filesystems.contains(&fs)
    }

    /// Whether force-unmount escalation pauses between kill signals
    pub fn sleep_on_unmount(&self) -> bool {
        self.sleep_on_unmount.load(Ordering::SeqCst)
    }

    pub fn set_sleep_on_unmount(&self, sleep: bool) {
        self.sleep_on_unmount.store(sleep, Ordering::SeqCst);
    }

    pub fn commands(&self) -> &dyn CommandRunner {
        self.adapters.commands.as_ref()
    }

    pub fn system(&self) -> &dyn SystemOps {
        self.adapters.system.as_ref()
    }

    pub fn notify(&self, event: StorageEvent) {
        tracing::trace!(kind = event.kind(), "Delivering event");
        self.notifier.notify(&event);
    }
}
