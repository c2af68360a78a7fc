//! Object-store port (driven/secondary port)
//!
//! Interface for the remote object store. The production implementation
//! targets S3, but the engine only ever sees this trait, which keeps the
//! sync loops testable against an in-memory double.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific and don't need domain-level classification.
//! - Downloads and uploads move whole files by path; multipart chunking
//!   is the adapter's concern, tuned by
//!   [`TransferSettings`](crate::config::TransferSettings).
//! - `ObjectPage::truncated` is a plain bool: adapters map a missing
//!   truncation flag from the remote to `false`.

use std::path::Path;
use std::sync::Arc;

/// One object as reported by the paginated list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object key.
    pub key: String,
    /// Opaque entity tag; changes on every remote write.
    pub etag: String,
    /// Object size in bytes.
    pub size: i64,
}

/// A single page of list results.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    /// Continuation token for the next page, if any.
    pub next_token: Option<String>,
    /// Whether more pages follow.
    pub truncated: bool,
}

/// Options applied to uploads.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// KMS key id; when set, the upload requests `aws:kms` server-side
    /// encryption with this key. The canned ACL is always
    /// `bucket-owner-full-control`.
    pub kms_key_id: Option<String>,
}

/// Result of a batched delete: keys removed plus per-key failures.
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<BatchDeleteError>,
}

/// A single failed key from a batched delete.
#[derive(Debug, Clone)]
pub struct BatchDeleteError {
    pub key: String,
    pub message: String,
}

/// Port trait for remote object-store operations.
///
/// Implementations handle credentials, request signing, retry-worthy
/// error mapping, and multipart chunking.
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Lists one page of objects under `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> anyhow::Result<ObjectPage>;

    /// Downloads `key` into the file at `dest`, returning bytes written.
    /// The parent directory must already exist.
    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> anyhow::Result<u64>;

    /// Uploads the file at `source` to `key`.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        options: &UploadOptions,
    ) -> anyhow::Result<()>;

    /// Deletes a single object. Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;

    /// Deletes a batch of objects, reporting per-key failures.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> anyhow::Result<BatchDeleteOutcome>;

    /// Resolves the region the bucket lives in.
    async fn bucket_region(&self, bucket: &str) -> anyhow::Result<String>;
}

/// Port trait for building store clients.
///
/// The orchestrator asks for a fresh client whenever a mount needs a
/// different region or an assumed role; how sessions and credentials are
/// constructed is entirely the adapter's business.
#[async_trait::async_trait]
pub trait IStoreBuilder: Send + Sync {
    /// Builds a client pinned to `region`, optionally under `role_arn`.
    async fn build(
        &self,
        region: &str,
        role_arn: Option<&str>,
    ) -> anyhow::Result<Arc<dyn IObjectStore>>;
}
