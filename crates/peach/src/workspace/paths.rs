//! Path resolution confined to a workspace root.

use std::path::{Component, Path, PathBuf};

use log::warn;

use super::error::{WorkspaceError, WorkspaceResult};

/// Resolve `relative` under `root` without touching the filesystem.
///
/// Leading slashes are ignored; `..`, absolute components and NUL bytes are
/// rejected outright.
pub fn resolve_path(root: &Path, relative: &str) -> WorkspaceResult<PathBuf> {
    let relative = relative.trim_start_matches('/');
    let mut result = root.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(WorkspaceError::PathTraversal);
                }
                result.push(name);
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                warn!("Path traversal attempt detected: parent directory (..) in path");
                return Err(WorkspaceError::PathTraversal);
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in relative path");
                return Err(WorkspaceError::PathTraversal);
            }
        }
    }

    Ok(result)
}

/// Resolve a path and make sure symlinks don't lead out of `root`.
pub fn resolve_and_verify_path(root: &Path, relative: &str) -> WorkspaceResult<PathBuf> {
    let built = resolve_path(root, relative)?;

    let existing = if built.exists() {
        Some(built.as_path())
    } else {
        built.parent().filter(|p| p.exists())
    };

    if let Some(existing) = existing {
        let canonical_root = root.canonicalize()?;
        let canonical = existing.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            warn!(
                "Symlink escape attempt: {:?} resolved to {:?} outside {:?}",
                built, canonical, canonical_root
            );
            return Err(WorkspaceError::PathTraversal);
        }
    }

    Ok(built)
}

/// Validate a single file name.
pub fn validate_file_name(name: &str) -> WorkspaceResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(WorkspaceError::InvalidPath(format!(
            "invalid file name '{}'",
            name
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(WorkspaceError::InvalidPath(format!(
            "file name '{}' contains a separator or NUL byte",
            name
        )));
    }
    Ok(())
}
