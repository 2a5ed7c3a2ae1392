// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use crate::StorageError;

/// Captured result of an external tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; -1 when the process was killed by a signal
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external filesystem and partitioning tools
///
/// Returns `Err` only when the program could not be spawned; a non-zero exit
/// status is reported through [`CommandOutput::status`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError>;
}
