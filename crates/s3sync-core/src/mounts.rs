//! Mount records and their JSON decoding rules
//!
//! A *mount* pairs a remote bucket + key prefix with a local destination
//! directory. Mounts arrive as a JSON array on the command line; records
//! may omit `writeable`, `kmsArn`, and `roleArn`, which default to
//! `false` / empty / empty. Fields beyond the six known ones are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while decoding the mount configuration.
#[derive(Debug, Error)]
pub enum MountError {
    /// The supplied string is not a valid JSON array of mount records.
    #[error("invalid mount configuration JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// A single mount record as decoded from the configuration JSON.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Mount {
    /// Unique identifier; becomes the destination subdirectory name.
    pub id: String,
    /// Remote bucket name.
    pub bucket: String,
    /// Key prefix scoping this mount inside the bucket.
    pub prefix: String,
    /// Whether local changes propagate back to the remote.
    #[serde(default)]
    pub writeable: bool,
    /// KMS key ARN for server-side encryption of uploads, empty if none.
    #[serde(default, rename = "kmsArn")]
    pub kms_arn: String,
    /// Role to assume when talking to the remote, empty if none.
    #[serde(default, rename = "roleArn")]
    pub role_arn: String,
}

impl Mount {
    /// Identity string used to deduplicate mounts. Two mounts collide when
    /// their bucket, prefix, and id concatenation matches; later duplicates
    /// are skipped.
    pub fn identity(&self) -> String {
        format!("{}{}{}", self.bucket, self.prefix, self.id)
    }
}

/// Decodes the mount JSON array, applying record defaults.
///
/// An empty input string yields an empty list (no mounts configured).
pub fn decode_mounts(json: &str) -> Result<Vec<Mount>, MountError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mounts: Vec<Mount> = serde_json::from_str(json)?;
    Ok(mounts)
}

/// Per-mount runtime configuration derived at orchestration time.
///
/// `destination` is `destination_base/<mount id>` and is created on demand
/// by the downloader.
#[derive(Debug, Clone)]
pub struct MountConfiguration {
    pub bucket: String,
    pub prefix: String,
    pub destination: PathBuf,
    pub writeable: bool,
    pub kms_key_id: String,
    pub role_arn: String,
}

impl MountConfiguration {
    /// Derives the configuration for `mount` under `destination_base`.
    pub fn derive(mount: &Mount, destination_base: &Path) -> Self {
        Self {
            bucket: mount.bucket.clone(),
            prefix: mount.prefix.clone(),
            destination: destination_base.join(&mount.id),
            writeable: mount.writeable,
            kms_key_id: mount.kms_arn.clone(),
            role_arn: mount.role_arn.clone(),
        }
    }

    /// The listing prefix for this mount: a bare `/` means "whole bucket".
    pub fn list_prefix(&self) -> &str {
        if self.prefix == "/" {
            ""
        } else {
            &self.prefix
        }
    }
}
