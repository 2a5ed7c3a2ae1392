// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod events;
pub mod ids;
pub mod operations;

pub use errors::{StorageError, StorageErrorKind};
pub use events::StorageEvent;
pub use ids::OperationId;
pub use operations::{OperationEvent, OperationKind, OperationProgress};
