// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use super::{OperationId, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Trim,
    IdleMaintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: OperationId,
    pub operation: OperationKind,
    pub phase: String,
    pub items_processed: u64,
    pub items_total: Option<u64>,
    pub percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum OperationEvent {
    Progress(OperationProgress),
    Completed {
        operation_id: OperationId,
        operation: OperationKind,
    },
    Failed {
        operation_id: OperationId,
        operation: OperationKind,
        error: StorageError,
    },
}

impl OperationEvent {
    pub fn operation_id(&self) -> OperationId {
        match self {
            Self::Progress(progress) => progress.operation_id,
            Self::Completed { operation_id, .. } | Self::Failed { operation_id, .. } => {
                *operation_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StorageErrorKind;

    #[test]
    fn operation_event_progress_roundtrips() {
        let event = OperationEvent::Progress(OperationProgress {
            operation_id: OperationId::new(),
            operation: OperationKind::Trim,
            phase: "/data".to_string(),
            items_processed: 1,
            items_total: Some(4),
            percent: Some(25),
        });

        let json = serde_json::to_string(&event).expect("serialize event");
        let parsed: OperationEvent = serde_json::from_str(&json).expect("deserialize event");
        assert_eq!(parsed, event);
    }

    #[test]
    fn failed_event_carries_error_kind() {
        let id = OperationId::new();
        let event = OperationEvent::Failed {
            operation_id: id,
            operation: OperationKind::IdleMaintenance,
            error: StorageError::new(StorageErrorKind::Internal, "fstrim exited 1"),
        };
        assert_eq!(event.operation_id(), id);
    }
}
