// SPDX-License-Identifier: GPL-3.0-only

use crate::StorageEvent;

/// Receives lifecycle notifications. Called with registry locks held, so it must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StorageEvent);
}
