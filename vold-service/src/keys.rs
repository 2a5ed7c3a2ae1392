// SPDX-License-Identifier: GPL-3.0-only

//! Persisted raw keys for adopted (private) partitions

use std::io::ErrorKind;
use std::path::PathBuf;

use rand::RngCore;
use tokio::io::AsyncWriteExt;
use vold_contracts::StorageError;
use vold_types::normalize_guid;

#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/expand_<guid>.key`, with the GUID lowercased and undashed
    pub fn key_path(&self, part_guid: &str) -> Result<PathBuf, StorageError> {
        let normalized = normalize_guid(part_guid).ok_or_else(|| {
            StorageError::invalid_input(format!("Invalid partition GUID: {part_guid}"))
        })?;
        Ok(self.dir.join(format!("expand_{normalized}.key")))
    }

    pub fn generate(size: usize) -> Vec<u8> {
        let mut key = vec![0u8; size];
        rand::rng().fill_bytes(&mut key);
        key
    }

    pub async fn write_key(&self, part_guid: &str, key: &[u8]) -> Result<(), StorageError> {
        let path = self.key_path(part_guid)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .await?;
        file.write_all(key).await?;
        file.sync_all().await?;

        tracing::debug!(path = %path.display(), "Persisted partition key");
        Ok(())
    }

    /// `Ok(None)` when no key was ever persisted for the GUID
    pub async fn read_key(&self, part_guid: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.key_path(part_guid)?;
        match tokio::fs::read(&path).await {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn forget_key(&self, part_guid: &str) -> Result<(), StorageError> {
        let path = self.key_path(part_guid)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No key to forget");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Per-volume key material stored under the filesystem UUID
    pub async fn forget_volume_keys(&self, fs_uuid: &str) -> Result<(), StorageError> {
        let path = self.dir.join("volume_keys").join(fs_uuid);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
