//! Destination name checks.
//!
//! The sender chooses the file name, so it is confined to the configured
//! destination directory before anything touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::TransferError;

/// Resolves `file_name` under `base`, rejecting names that could escape it.
pub fn resolve_destination(base: &Path, file_name: &str) -> Result<PathBuf, TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }

    if file_name.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "embedded NUL in name: {file_name:?}"
        )));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    if file_name.len() >= 2 && file_name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidPath(format!(
            "drive prefix not allowed: {file_name}"
        )));
    }
    if file_name.starts_with("\\\\") {
        return Err(TransferError::InvalidPath(format!(
            "UNC path not allowed: {file_name}"
        )));
    }

    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent traversal not allowed: {file_name}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "rooted path not allowed: {file_name}"
                )));
            }
        }
    }
    if !has_normal || file_name.ends_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "name does not denote a file: {file_name}"
        )));
    }

    Ok(base.join(path))
}
