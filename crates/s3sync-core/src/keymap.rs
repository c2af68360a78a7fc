//! Local-path ⇄ remote-key mapping
//!
//! Maps files beneath a mount's destination directory to object keys under
//! the mount's prefix and back. The mapping is total over files beneath
//! the destination; paths outside it are undefined. Keys ending in `/` are
//! directory markers and are never mapped to files.

use std::path::{Path, PathBuf};

/// Computes the remote key for a local file beneath `destination`.
///
/// The prefix loses any trailing `/`, the destination part of the local
/// path is stripped, and the remainder is joined with a single `/`. An
/// empty prefix maps the file directly under the bucket root.
pub fn to_remote_key(local_path: &Path, prefix: &str, destination: &Path) -> String {
    let prefix = prefix.trim_end_matches('/');

    let local = normalize(local_path);
    let dest = normalize(destination);

    let remainder = local.strip_prefix(dest.as_str()).unwrap_or(local.as_str());
    let remainder = remainder.trim_start_matches('/');

    if prefix.is_empty() {
        remainder.to_string()
    } else {
        format!("{prefix}/{remainder}")
    }
}

/// Computes the local path for a remote key: the inverse of
/// [`to_remote_key`] for keys under `prefix`.
pub fn to_local_path(key: &str, prefix: &str, destination: &Path) -> PathBuf {
    let remainder = key.strip_prefix(prefix).unwrap_or(key);
    destination.join(remainder.trim_start_matches('/'))
}

/// Forward-slash form of a path.
fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
