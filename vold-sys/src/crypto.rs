// SPDX-License-Identifier: GPL-3.0-only

//! dm-crypt mappings through `dmsetup` and file-backed per-user keys

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::RngCore;
use vold_contracts::{CommandRunner, CryptoBackend, StorageError, StorageErrorKind};

pub const DMSETUP: &str = "dmsetup";

const CIPHER: &str = "aes-cbc-essiv:sha256";
const KEY_SIZE: usize = 32;
const USER_KEY_SIZE: usize = 64;
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Default)]
struct UserKeyState {
    unlocked: HashSet<u32>,
    /// Keys that never touch disk
    ephemeral: HashMap<u32, i32>,
}

pub struct DmCryptBackend {
    runner: Arc<dyn CommandRunner>,
    mapper_dir: PathBuf,
    user_key_dir: PathBuf,
    state: Mutex<UserKeyState>,
}

impl DmCryptBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, user_key_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mapper_dir: PathBuf::from("/dev/mapper"),
            user_key_dir: user_key_dir.into(),
            state: Mutex::new(UserKeyState::default()),
        }
    }

    pub fn is_unlocked(&self, user_id: u32) -> bool {
        self.lock_state()
            .map(|state| state.unlocked.contains(&user_id))
            .unwrap_or(false)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, UserKeyState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::internal("user key state poisoned"))
    }

    fn user_dir(&self, user_id: u32) -> PathBuf {
        self.user_key_dir.join(user_id.to_string())
    }

    fn stored_serial(&self, user_id: u32) -> Result<Option<i32>, StorageError> {
        if let Some(serial) = self.lock_state()?.ephemeral.get(&user_id) {
            return Ok(Some(*serial));
        }
        match fs::read_to_string(self.user_dir(user_id).join("serial")) {
            Ok(text) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StorageError::internal(format!("corrupt serial for user {user_id}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn require_serial(&self, user_id: u32, serial: i32) -> Result<(), StorageError> {
        match self.stored_serial(user_id)? {
            Some(stored) if stored == serial => Ok(()),
            Some(stored) => Err(StorageError::new(
                StorageErrorKind::Conflict,
                format!("user {user_id} key has serial {stored}, not {serial}"),
            )),
            None => Err(StorageError::not_found(format!("no key for user {user_id}"))),
        }
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

fn device_sectors(device: &Path) -> Result<u64, StorageError> {
    let mut file = File::open(device)?;
    Ok(file.seek(SeekFrom::End(0))? / SECTOR_SIZE)
}

#[async_trait]
impl CryptoBackend for DmCryptBackend {
    fn key_size(&self) -> usize {
        KEY_SIZE
    }

    async fn setup(
        &self,
        name: &str,
        raw_device: &Path,
        key: &[u8],
    ) -> Result<PathBuf, StorageError> {
        if key.len() != KEY_SIZE {
            return Err(StorageError::invalid_input(format!(
                "crypto key is {} bytes, expected {KEY_SIZE}",
                key.len()
            )));
        }

        let sectors = device_sectors(raw_device)?;
        let table = format!(
            "0 {sectors} crypt {CIPHER} {} 0 {} 0",
            hex::encode(key),
            raw_device.display()
        );
        let args = vec![
            "create".to_string(),
            name.to_string(),
            "--table".to_string(),
            table,
        ];

        let output = self.runner.run(DMSETUP, &args).await?;
        if !output.success() {
            return Err(StorageError::internal(format!(
                "dmsetup create {name} failed with status {}",
                output.status
            )));
        }

        tracing::info!(name, raw = %raw_device.display(), "Crypto mapping established");
        Ok(self.mapper_dir.join(name))
    }

    async fn revert(&self, name: &str) -> Result<(), StorageError> {
        let args = vec!["remove".to_string(), "--retry".to_string(), name.to_string()];
        let output = self.runner.run(DMSETUP, &args).await?;
        if output.success() || output.stderr.contains("No such device") {
            Ok(())
        } else {
            Err(StorageError::internal(format!(
                "dmsetup remove {name} failed with status {}",
                output.status
            )))
        }
    }

    async fn create_user_key(
        &self,
        user_id: u32,
        serial: i32,
        ephemeral: bool,
    ) -> Result<(), StorageError> {
        if self.stored_serial(user_id)?.is_some() {
            return Err(StorageError::new(
                StorageErrorKind::Conflict,
                format!("key for user {user_id} already exists"),
            ));
        }

        if ephemeral {
            let mut state = self.lock_state()?;
            state.ephemeral.insert(user_id, serial);
            state.unlocked.insert(user_id);
            return Ok(());
        }

        let mut key = vec![0u8; USER_KEY_SIZE];
        rand::rng().fill_bytes(&mut key);

        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir)?;
        write_private(&dir.join("key"), hex::encode(&key).as_bytes())?;
        write_private(&dir.join("serial"), serial.to_string().as_bytes())?;

        self.lock_state()?.unlocked.insert(user_id);
        tracing::info!(user_id, serial, "Created user key");
        Ok(())
    }

    async fn destroy_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        {
            let mut state = self.lock_state()?;
            state.unlocked.remove(&user_id);
            state.ephemeral.remove(&user_id);
        }
        match fs::remove_dir_all(self.user_dir(user_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_user_key_auth(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        self.require_serial(user_id, serial)?;
        if self.lock_state()?.ephemeral.contains_key(&user_id) {
            return Ok(());
        }
        write_private(
            &self.user_dir(user_id).join("auth"),
            format!("{token}\n{secret}\n").as_bytes(),
        )
    }

    async fn unlock_user_key(
        &self,
        user_id: u32,
        serial: i32,
        token: &str,
        secret: &str,
    ) -> Result<(), StorageError> {
        self.require_serial(user_id, serial)?;

        match fs::read_to_string(self.user_dir(user_id).join("auth")) {
            Ok(auth) => {
                let mut lines = auth.lines();
                if lines.next() != Some(token) || lines.next() != Some(secret) {
                    return Err(StorageError::new(
                        StorageErrorKind::PermissionDenied,
                        format!("wrong credentials for user {user_id}"),
                    ));
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.lock_state()?.unlocked.insert(user_id);
        tracing::info!(user_id, "Unlocked user key");
        Ok(())
    }

    async fn lock_user_key(&self, user_id: u32) -> Result<(), StorageError> {
        self.lock_state()?.unlocked.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemCommandRunner;

    fn backend(dir: &Path) -> DmCryptBackend {
        DmCryptBackend::new(Arc::new(SystemCommandRunner::new()), dir)
    }

    #[tokio::test]
    async fn user_key_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let crypto = backend(dir.path());

        crypto.create_user_key(10, 7, false).await.unwrap();
        assert!(crypto.is_unlocked(10));
        assert!(crypto.create_user_key(10, 7, false).await.is_err());

        crypto.add_user_key_auth(10, 7, "aa", "bb").await.unwrap();
        crypto.lock_user_key(10).await.unwrap();
        assert!(!crypto.is_unlocked(10));

        let wrong = crypto.unlock_user_key(10, 7, "aa", "cc").await.unwrap_err();
        assert_eq!(wrong.kind, StorageErrorKind::PermissionDenied);

        crypto.unlock_user_key(10, 7, "aa", "bb").await.unwrap();
        assert!(crypto.is_unlocked(10));

        crypto.destroy_user_key(10).await.unwrap();
        assert!(!dir.path().join("10").exists());
    }

    #[tokio::test]
    async fn serial_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let crypto = backend(dir.path());
        crypto.create_user_key(11, 1, true).await.unwrap();

        let err = crypto.unlock_user_key(11, 2, "", "").await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::Conflict);
        assert!(!dir.path().join("11").exists());
    }

    #[tokio::test]
    async fn setup_rejects_wrong_key_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let crypto = backend(dir.path());
        let err = crypto
            .setup("private:8,3", Path::new("/dev/null"), &[0u8; 4])
            .await
            .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::InvalidInput);
    }
}
