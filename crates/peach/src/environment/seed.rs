//! Workspace seeding from assignment files.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};

use super::error::{EnvironmentError, EnvironmentResult};
use crate::course::AssignmentFile;
use crate::workspace::{resolve_path, validate_file_name};

/// Write every non-deleted file into the workspace directory.
///
/// Returns the number of files written. Directories are created as needed
/// and existing files are overwritten.
pub async fn seed_workspace(workspace: &Path, files: &[AssignmentFile]) -> EnvironmentResult<usize> {
    let mut written = 0;

    for file in files.iter().filter(|f| !f.is_deleted) {
        let target = target_path(workspace, file)?;
        let content = STANDARD
            .decode(file.content_b64.trim())
            .map_err(|e| EnvironmentError::invalid_file(&file.file_name, e.to_string()))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::anyhow!("creating {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(&target, &content)
            .await
            .map_err(|e| anyhow::anyhow!("writing {}: {}", target.display(), e))?;

        debug!("Seeded {} ({} bytes)", target.display(), content.len());
        written += 1;
    }

    Ok(written)
}

fn target_path(workspace: &Path, file: &AssignmentFile) -> EnvironmentResult<PathBuf> {
    let name = file.file_name.as_str();
    validate_file_name(name).map_err(|e| EnvironmentError::invalid_file(name, e.to_string()))?;

    let dir = resolve_path(workspace, &file.file_path).map_err(|e| {
        warn!("Rejected seed path {:?} for {}: {}", file.file_path, name, e);
        EnvironmentError::invalid_file(name, e.to_string())
    })?;
    Ok(dir.join(name))
}
