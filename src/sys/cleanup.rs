// src/sys/cleanup.rs

use crate::sys::traits::WorkspaceJanitor;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

pub struct SystemJanitor;

#[async_trait]
impl WorkspaceJanitor for SystemJanitor {
    async fn scrub_credential(&self, credential_path: &Path) -> Result<(), String> {
        match fs::remove_file(credential_path).await {
            Ok(()) => Ok(()),
            // A build that failed before materialization has nothing to scrub.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!(
                "Failed to delete credential file {:?}: {}",
                credential_path, e
            )),
        }
    }

    async fn prune_workspaces(&self, work_root: &Path, keep_count: usize) -> Result<usize, String> {
        let mut entries = match fs::read_dir(work_root).await {
            Ok(dir) => dir,
            Err(e) => return Err(format!("Failed to read work root: {}", e)),
        };

        let mut paths: Vec<PathBuf> = Vec::new();

        // 1. Collect all build workspaces
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                paths.push(path);
            }
        }

        // 2. Sort paths alphabetically (which equates to chronological due to
        // the timestamp prefix on workspace names)
        paths.sort();

        let total = paths.len();
        if total <= keep_count {
            return Ok(0); // Nothing to prune
        }

        // 3. Calculate how many to delete and slice the array
        let prune_count = total - keep_count;
        let paths_to_delete = &paths[0..prune_count];

        let mut deleted = 0;

        // 4. Safely remove the old workspaces
        for path in paths_to_delete {
            if let Err(e) = fs::remove_dir_all(path).await {
                // One stubborn directory must not fail the build that just ran
                warn!(path = ?path, error = %e, "Failed to delete old workspace");
            } else {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}
