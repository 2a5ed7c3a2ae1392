// SPDX-License-Identifier: GPL-3.0-only

//! Background trim and idle maintenance passes
//!
//! Targets are resolved by the caller under the registry lock; a pass then
//! runs without it. At most one idle-maintenance pass runs at a time, and
//! [`Maintenance::abort`] interrupts the pass between targets and waits for
//! it to wind down.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use vold_contracts::{
    OperationEvent, OperationId, OperationKind, OperationProgress, StorageError, StorageEvent,
};
use vold_sys::fs_tools;

use crate::context::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Running,
    Aborting,
}

/// Single-slot gate for idle maintenance
#[derive(Debug)]
pub struct Maintenance {
    state: watch::Sender<PassState>,
}

impl Default for Maintenance {
    fn default() -> Self {
        Self::new()
    }
}

impl Maintenance {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PassState::Idle);
        Self { state }
    }

    pub fn state(&self) -> PassState {
        *self.state.borrow()
    }

    /// Claim the slot, failing `Busy` while another pass owns it
    pub fn try_begin(&self) -> Result<(), StorageError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == PassState::Idle {
                *state = PassState::Running;
                true
            } else {
                false
            }
        });

        if claimed {
            Ok(())
        } else {
            Err(StorageError::busy("idle maintenance is already running"))
        }
    }

    pub(crate) fn finish(&self) {
        self.state.send_replace(PassState::Idle);
    }

    /// Ask a running pass to stop and wait until it has
    pub async fn abort(&self) {
        let signalled = self.state.send_if_modified(|state| {
            if *state == PassState::Running {
                *state = PassState::Aborting;
                true
            } else {
                false
            }
        });
        if signalled {
            tracing::info!("Aborting idle maintenance");
        }
        self.wait_idle().await;
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let idle = *rx.borrow_and_update() == PassState::Idle;
            if idle || rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_aborting(&self) -> bool {
        self.state() == PassState::Aborting
    }

    /// Sleep for `delay`; returns `true` if an abort arrived first
    async fn pause(&self, delay: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let aborted = async {
            loop {
                let aborting = *rx.borrow_and_update() == PassState::Aborting;
                if aborting || rx.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = aborted => true,
        }
    }
}

fn emit(ctx: &Context, event: OperationEvent) {
    ctx.notify(StorageEvent::Operation(event));
}

/// Trim every target in order, reporting progress through the notifier
///
/// With a `gate`, the pass waits the configured step delay between targets
/// and stops early on abort.
pub async fn run_pass(
    ctx: &Context,
    gate: Option<&Maintenance>,
    operation: OperationKind,
    operation_id: OperationId,
    targets: Vec<PathBuf>,
) {
    let total = targets.len() as u64;
    let mut last_error = None;
    tracing::info!(%operation_id, ?operation, targets = total, "Starting trim pass");

    for (index, target) in targets.iter().enumerate() {
        if gate.is_some_and(Maintenance::is_aborting) {
            tracing::info!(%operation_id, "Trim pass aborted");
            break;
        }

        match fs_tools::trim(ctx.commands(), target).await {
            Ok(()) => tracing::debug!(path = %target.display(), "Trimmed"),
            Err(e) => {
                tracing::warn!(path = %target.display(), "Trim failed: {}", e);
                last_error = Some(e);
            }
        }

        let processed = index as u64 + 1;
        emit(
            ctx,
            OperationEvent::Progress(OperationProgress {
                operation_id,
                operation,
                phase: target.display().to_string(),
                items_processed: processed,
                items_total: Some(total),
                percent: Some(((processed * 100) / total.max(1)) as u8),
            }),
        );

        if let Some(gate) = gate {
            if processed < total && gate.pause(ctx.config.maintenance.step_delay()).await {
                tracing::info!(%operation_id, "Trim pass aborted");
                break;
            }
        }
    }

    let event = match last_error {
        None => OperationEvent::Completed {
            operation_id,
            operation,
        },
        Some(error) => OperationEvent::Failed {
            operation_id,
            operation,
            error,
        },
    };
    emit(ctx, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_is_busy_until_finished() {
        let maintenance = Maintenance::new();
        maintenance.try_begin().unwrap();
        assert!(maintenance.try_begin().unwrap_err().is_busy());

        maintenance.finish();
        assert_eq!(maintenance.state(), PassState::Idle);
        assert!(maintenance.try_begin().is_ok());
    }

    #[tokio::test]
    async fn abort_interrupts_pause_and_waits_for_idle() {
        let maintenance = std::sync::Arc::new(Maintenance::new());
        maintenance.try_begin().unwrap();

        let runner = maintenance.clone();
        let pass = tokio::spawn(async move {
            let aborted = runner.pause(Duration::from_secs(3600)).await;
            runner.finish();
            aborted
        });

        tokio::task::yield_now().await;
        maintenance.abort().await;
        assert_eq!(maintenance.state(), PassState::Idle);
        assert!(pass.await.unwrap());
    }

    #[tokio::test]
    async fn abort_without_pass_returns_immediately() {
        let maintenance = Maintenance::new();
        maintenance.abort().await;
        assert_eq!(maintenance.state(), PassState::Idle);
    }
}
