//! File operations inside an environment's workspace directory.
//!
//! The workspace directory is the host-side half of the pod's data volume,
//! so changes made here are visible inside the pod immediately.

mod error;
mod paths;

pub use error::{WorkspaceError, WorkspaceResult};
pub use paths::{resolve_and_verify_path, resolve_path, validate_file_name};

use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::fs;

/// File operations rooted at one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceFiles {
    root: PathBuf,
}

impl WorkspaceFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_root(&self) -> WorkspaceResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn existing(&self, relative: &str) -> WorkspaceResult<PathBuf> {
        let path = resolve_and_verify_path(&self.root, relative)?;
        if !path.exists() {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        Ok(path)
    }

    fn not_root(&self, path: &Path, relative: &str) -> WorkspaceResult<()> {
        if path == self.root {
            return Err(WorkspaceError::InvalidPath(format!(
                "'{}' is the workspace root",
                relative
            )));
        }
        Ok(())
    }

    /// Create an empty file `file_name` in directory `dir`.
    pub async fn create_file(&self, dir: &str, file_name: &str) -> WorkspaceResult<PathBuf> {
        validate_file_name(file_name)?;
        self.ensure_root().await?;

        let dir_path = resolve_and_verify_path(&self.root, dir)?;
        let path = dir_path.join(file_name);
        if path.exists() {
            return Err(WorkspaceError::AlreadyExists(format!("{}/{}", dir, file_name)));
        }

        fs::create_dir_all(&dir_path).await?;
        fs::write(&path, b"").await?;
        info!("Created file {}", path.display());
        Ok(path)
    }

    /// Move or rename a file.
    pub async fn move_file(&self, origin: &str, destination: &str) -> WorkspaceResult<PathBuf> {
        let from = self.existing(origin)?;
        if from.is_dir() {
            return Err(WorkspaceError::InvalidPath(format!("'{}' is a directory", origin)));
        }
        let to = resolve_and_verify_path(&self.root, destination)?;
        self.not_root(&to, destination)?;

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await?;
        info!("Moved {} -> {}", from.display(), to.display());
        Ok(to)
    }

    pub async fn delete_file(&self, relative: &str) -> WorkspaceResult<()> {
        let path = self.existing(relative)?;
        if path.is_dir() {
            return Err(WorkspaceError::InvalidPath(format!("'{}' is a directory", relative)));
        }
        fs::remove_file(&path).await?;
        info!("Deleted file {}", path.display());
        Ok(())
    }

    /// Create a directory (and missing parents). Fails if it already exists.
    pub async fn create_dir(&self, relative: &str) -> WorkspaceResult<PathBuf> {
        self.ensure_root().await?;
        let path = resolve_and_verify_path(&self.root, relative)?;
        if path.exists() {
            return Err(WorkspaceError::AlreadyExists(relative.to_string()));
        }
        fs::create_dir_all(&path).await?;
        info!("Created directory {}", path.display());
        Ok(path)
    }

    /// Move every entry of `origin` into `destination`, creating it if needed.
    pub async fn move_dir(&self, origin: &str, destination: &str) -> WorkspaceResult<PathBuf> {
        let from = self.existing(origin)?;
        if !from.is_dir() {
            return Err(WorkspaceError::InvalidPath(format!("'{}' is not a directory", origin)));
        }
        let to = resolve_and_verify_path(&self.root, destination)?;
        if to.starts_with(&from) {
            return Err(WorkspaceError::InvalidPath(format!(
                "cannot move '{}' into itself",
                origin
            )));
        }

        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        let mut moved = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            fs::rename(entry.path(), to.join(entry.file_name())).await?;
            moved += 1;
        }
        debug!("Moved {} entries from {} to {}", moved, from.display(), to.display());
        Ok(to)
    }

    /// Delete a directory and everything below it.
    pub async fn delete_dir(&self, relative: &str) -> WorkspaceResult<()> {
        let path = self.existing(relative)?;
        self.not_root(&path, relative)?;
        if !path.is_dir() {
            return Err(WorkspaceError::InvalidPath(format!("'{}' is not a directory", relative)));
        }
        fs::remove_dir_all(&path).await?;
        info!("Deleted directory {}", path.display());
        Ok(())
    }

    /// Open a file for streaming.
    pub async fn open(&self, relative: &str) -> WorkspaceResult<(fs::File, u64, PathBuf)> {
        let path = self.existing(relative)?;
        if !path.is_file() {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        let file = fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok((file, len, path))
    }
}
