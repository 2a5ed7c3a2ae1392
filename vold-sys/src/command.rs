// SPDX-License-Identifier: GPL-3.0-only

//! External tool invocation

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use vold_contracts::{CommandOutput, CommandRunner, StorageError};

use crate::SysError;

/// Runs tools as child processes and captures their output
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        tracing::debug!(program, ?args, "Running external tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SysError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        tracing::debug!(program, status, "External tool exited");
        if status != 0 && !stderr.is_empty() {
            tracing::debug!(program, %stderr, "External tool stderr");
        }

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
