//! Filesystem tree collection
//!
//! Shared traversal used by the downloader's delete phase and the
//! uploader's registration and catch-up walks. The walk is iterative
//! (explicit stack) and resilient: unreadable entries are logged and
//! skipped, never fatal.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Directories and files found beneath (and including) a root.
#[derive(Debug, Default)]
pub struct DirectoryTree {
    /// All directories in top-down order, the root first.
    pub dirs: Vec<PathBuf>,
    /// All regular files.
    pub files: Vec<PathBuf>,
}

/// Collects every directory and file beneath `root`.
///
/// The root itself is the first entry of `dirs`. A missing or unreadable
/// root yields an empty tree.
pub async fn collect_tree(root: &Path) -> DirectoryTree {
    let mut tree = DirectoryTree::default();

    match tokio::fs::metadata(root).await {
        Ok(md) if md.is_dir() => {}
        Ok(_) => {
            warn!(path = %root.display(), "walk root is not a directory");
            return tree;
        }
        Err(e) => {
            warn!(path = %root.display(), error = %e, "cannot stat walk root");
            return tree;
        }
    }

    tree.dirs.push(root.to_path_buf());
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot read directory, skipping");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "error walking directory, skipping entry");
                    continue;
                }
            };

            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {
                    tree.dirs.push(path.clone());
                    stack.push(path);
                }
                Ok(ft) if ft.is_file() => tree.files.push(path),
                Ok(_) => {} // symlinks and special files are not synced
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                }
            }
        }
    }

    tree
}
