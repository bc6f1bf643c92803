//! Snapshot download — copy the sandbox filesystem to local disk.
//!
//! Walks the remote tree iteratively (directories are queued, not recursed)
//! and mirrors it under the target directory. Dotfile entries are skipped
//! and a file that fails to read is logged and skipped rather than failing
//! the whole snapshot.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{EntryKind, Sandbox};

/// Download `remote_dir` from the sandbox into `local_dir`.
/// Returns the number of files written.
pub async fn download_tree(
    sandbox: &dyn Sandbox,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<usize> {
    let remote_root = remote_dir.trim_end_matches('/').to_string();
    let mut pending: Vec<(String, PathBuf)> = vec![(remote_root.clone(), local_dir.to_path_buf())];
    let mut downloaded = 0usize;

    while let Some((remote, local)) = pending.pop() {
        let entries = sandbox
            .list_dir(&remote)
            .await
            .with_context(|| format!("Failed to list sandbox directory {}", remote))?;

        for entry in entries {
            if entry.name.starts_with('.') {
                continue;
            }
            // Listings should only contain children of the requested
            // directory; ignore anything that claims otherwise.
            if !entry.path.starts_with(&remote_root) {
                continue;
            }

            match entry.kind {
                EntryKind::Dir => {
                    let target = local.join(&entry.name);
                    std::fs::create_dir_all(&target)
                        .with_context(|| format!("Failed to create {}", target.display()))?;
                    pending.push((entry.path, target));
                }
                EntryKind::File => {
                    let target = local.join(&entry.name);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create {}", parent.display()))?;
                    }
                    match sandbox.read_file(&entry.path).await {
                        Ok(content) => {
                            std::fs::write(&target, content)
                                .with_context(|| format!("Failed to write {}", target.display()))?;
                            downloaded += 1;
                        }
                        Err(e) => {
                            tracing::warn!(path = %entry.path, error = %e, "skipping unreadable sandbox file");
                        }
                    }
                }
            }
        }
    }

    tracing::info!(files = downloaded, "downloaded sandbox snapshot");
    Ok(downloaded)
}
