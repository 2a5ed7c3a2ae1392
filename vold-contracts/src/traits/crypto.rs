// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::StorageError;

/// Block encryption and per-user key management
#[async_trait]
pub trait CryptoBackend: Send + Sync {
    /// Raw key length in bytes expected by [`CryptoBackend::setup`]
    fn key_size(&self) -> usize;

    /// Map `raw_device` through an encrypted target named `name`, returning the decrypted device path
    async fn setup(&self, name: &str, raw_device: &Path, key: &[u8])
    -> Result<PathBuf, StorageError>;

    async fn revert(&self, name: &str) -> Result<(), StorageError>;

    async fn create_user_key(&self, user_id: u32, serial: i32, ephemeral: bool)
    -> Result<(), StorageError>;

    async fn destroy_user_key(&self, user_id: u32) -> Result<(), StorageError>;

    async fn add_user_key_auth(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError>;

    async fn unlock_user_key(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError>;

    async fn lock_user_key(&self, user_id: u32) -> Result<(), StorageError>;
}
