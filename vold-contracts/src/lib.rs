// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;
pub mod validation;

pub use protocol::{
    OperationEvent, OperationId, OperationKind, OperationProgress, StorageError,
    StorageErrorKind, StorageEvent,
};
pub use traits::{
    AppFuseBridge, CommandOutput, CommandRunner, CryptoBackend, EventListener, OverlayHandle,
    OverlayLauncher, OverlayRequest, ProcessEntry, ProcessTable, RemountPlan, SystemOps,
};
