// SPDX-License-Identifier: GPL-3.0-only

//! Input checks applied at the control-plane boundary

use std::path::{Component, Path};

use crate::StorageError;

/// Disk and volume ids: `prefix:major,minor` style tokens
pub fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() {
        return Err(StorageError::invalid_input("Id must not be empty"));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ':' | ',' | '.' | '_' | '-')))
    {
        return Err(StorageError::invalid_input(format!(
            "Id {id:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Absolute path with no parent traversal or control characters
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.chars().any(char::is_control) {
        return Err(StorageError::invalid_input(format!(
            "Path {path:?} contains control characters"
        )));
    }

    let parsed = Path::new(path);
    if !parsed.is_absolute() {
        return Err(StorageError::invalid_input(format!(
            "Path {path:?} is not absolute"
        )));
    }
    if parsed.components().any(|c| c == Component::ParentDir) {
        return Err(StorageError::invalid_input(format!(
            "Path {path:?} must not contain '..'"
        )));
    }
    Ok(())
}

/// Non-empty, even-length hex string (keys, tokens, secrets)
pub fn validate_hex(value: &str) -> Result<(), StorageError> {
    if value.is_empty() || value.len() % 2 != 0 {
        return Err(StorageError::invalid_input("Hex value must have even, non-zero length"));
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StorageError::invalid_input("Hex value contains non-hex characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_volume_and_disk_forms() {
        assert!(validate_id("disk:8,16").is_ok());
        assert!(validate_id("public:179,1").is_ok());
        assert!(validate_id("emulated").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("disk:8/16").is_err());
    }

    #[test]
    fn paths_reject_traversal_and_relative() {
        assert!(validate_path("/data/app/main.obb").is_ok());
        assert!(validate_path("data/main.obb").is_err());
        assert!(validate_path("/data/../etc/shadow").is_err());
        assert!(validate_path("/data/\nx").is_err());
    }

    #[test]
    fn hex_must_be_even_length() {
        assert!(validate_hex("deadbeef").is_ok());
        assert!(validate_hex("abc").is_err());
        assert!(validate_hex("zz").is_err());
        assert!(validate_hex("").is_err());
    }
}
