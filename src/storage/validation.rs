//! Path validation
//!
//! Virtual paths are always absolute, `/`-separated and normalised lexically,
//! so `..` can never climb above the user root.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Resolve `target` against the virtual working directory `cwd`.
pub fn resolve_virtual_path(cwd: &str, target: &str) -> Result<String, StorageError> {
    if target.contains('\0') {
        return Err(StorageError::InvalidPath(target.replace('\0', "\\0")));
    }

    let joined = if target.starts_with('/') {
        target.to_string()
    } else {
        format!("{cwd}/{target}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Map a virtual path onto the real directory `root`
pub fn virtual_to_real_path(root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Ensure an existing real path does not escape `root` through a symlink
pub fn ensure_within_root(root: &Path, real: &Path, shown: &str) -> Result<(), StorageError> {
    let canonical_root = root.canonicalize()?;
    match real.canonicalize() {
        Ok(canonical) if canonical.starts_with(&canonical_root) => Ok(()),
        Ok(_) => Err(StorageError::PathTraversal(shown.to_string())),
        Err(_) => Err(StorageError::FileNotFound(shown.to_string())),
    }
}

/// Last component of a virtual path
pub fn file_name(virtual_path: &str) -> &str {
    virtual_path.rsplit('/').next().unwrap_or(virtual_path)
}
