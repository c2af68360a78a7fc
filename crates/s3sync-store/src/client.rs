//! S3 client adapter (secondary/driven adapter)
//!
//! Bridges the object-store port to S3. Transfers above the configured
//! part size move as concurrent parts: downloads use ranged GETs written
//! through per-part file handles, uploads use the multipart-upload API.
//! Everything at or below one part moves as a single request.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectCannedAcl, ObjectIdentifier,
    ServerSideEncryption,
};
use aws_sdk_s3::Client;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use s3sync_core::config::TransferSettings;
use s3sync_core::ports::object_store::{
    BatchDeleteError, BatchDeleteOutcome, IObjectStore, ObjectPage, RemoteObject, UploadOptions,
};

/// [`IObjectStore`] implementation backed by an S3 client.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    transfer: TransferSettings,
}

impl S3ObjectStore {
    pub fn new(client: Client, transfer: TransferSettings) -> Self {
        Self { client, transfer }
    }

    /// Downloads `key` as concurrent ranged parts into `dest`.
    async fn download_parts(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        total: u64,
    ) -> Result<u64> {
        let part_size = self.transfer.part_size;
        let part_count = total.div_ceil(part_size);
        debug!(%key, total, parts = part_count, "ranged multipart download");

        let file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        file.set_len(total).await?;
        drop(file);

        let semaphore = Arc::new(Semaphore::new(self.transfer.concurrency.max(1)));
        let mut parts: JoinSet<Result<u64>> = JoinSet::new();

        for index in 0..part_count {
            let start = index * part_size;
            let end = (start + part_size).min(total) - 1;
            let client = self.client.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            let dest = dest.to_path_buf();
            let semaphore = Arc::clone(&semaphore);

            parts.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("transfer semaphore closed");

                let resp = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .range(format!("bytes={start}-{end}"))
                    .send()
                    .await
                    .with_context(|| format!("ranged get failed for {key}"))?;
                let data = resp.body.collect().await?.into_bytes();

                let mut file = tokio::fs::OpenOptions::new().write(true).open(&dest).await?;
                file.seek(SeekFrom::Start(start)).await?;
                file.write_all(&data).await?;
                Ok(data.len() as u64)
            });
        }

        let mut written = 0u64;
        while let Some(joined) = parts.join_next().await {
            written += joined.context("download part task failed")??;
        }
        Ok(written)
    }

    /// Uploads `source` through the multipart-upload API.
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        options: &UploadOptions,
        total: u64,
    ) -> Result<()> {
        let part_size = self.transfer.part_size;
        let part_count = total.div_ceil(part_size);
        debug!(%key, total, parts = part_count, "multipart upload");

        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::BucketOwnerFullControl);
        if let Some(kms_key_id) = &options.kms_key_id {
            create = create
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(kms_key_id.as_str());
        }
        let created = create
            .send()
            .await
            .with_context(|| format!("failed to start multipart upload for {key}"))?;
        let upload_id = created
            .upload_id()
            .context("multipart upload has no upload id")?
            .to_string();

        let result = self
            .upload_parts_inner(bucket, key, source, &upload_id, total, part_size, part_count)
            .await;

        match result {
            Ok(completed) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .with_context(|| format!("failed to complete multipart upload for {key}"))?;
                Ok(())
            }
            Err(e) => {
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_parts_inner(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        upload_id: &str,
        total: u64,
        part_size: u64,
        part_count: u64,
    ) -> Result<CompletedMultipartUpload> {
        let semaphore = Arc::new(Semaphore::new(self.transfer.concurrency.max(1)));
        let mut parts: JoinSet<Result<CompletedPart>> = JoinSet::new();

        for index in 0..part_count {
            let start = index * part_size;
            let len = part_size.min(total - start) as usize;
            let part_number = (index + 1) as i32;
            let client = self.client.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            let upload_id = upload_id.to_string();
            let source = source.to_path_buf();
            let semaphore = Arc::clone(&semaphore);

            parts.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("transfer semaphore closed");

                let mut file = tokio::fs::File::open(&source).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;

                let part = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buf))
                    .send()
                    .await
                    .with_context(|| format!("failed to upload part {part_number} of {key}"))?;

                Ok(CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .build())
            });
        }

        let mut completed: Vec<CompletedPart> = Vec::with_capacity(part_count as usize);
        while let Some(joined) = parts.join_next().await {
            completed.push(joined.context("upload part task failed")??);
        }
        completed.sort_by_key(|p| p.part_number());

        Ok(CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build())
    }
}

#[async_trait::async_trait]
impl IObjectStore for S3ObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ObjectPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .with_context(|| format!("failed to list s3://{bucket}/{prefix}"))?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(RemoteObject {
                    key: obj.key()?.to_string(),
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or_default(),
                })
            })
            .collect();

        Ok(ObjectPage {
            objects,
            next_token: resp.next_continuation_token().map(str::to_string),
            // A missing flag means the listing is complete.
            truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    async fn download_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to stat s3://{bucket}/{key}"))?;
        let total = head.content_length().unwrap_or_default().max(0) as u64;

        if total > self.transfer.part_size {
            return self.download_parts(bucket, key, dest, total).await;
        }

        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to get s3://{bucket}/{key}"))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut body = resp.body;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        let total = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("failed to stat {}", source.display()))?
            .len();

        if total > self.transfer.part_size {
            return self.upload_parts(bucket, key, source, options, total).await;
        }

        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("failed to open {}", source.display()))?;

        let mut put = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .body(body);
        if let Some(kms_key_id) = &options.kms_key_id {
            put = put
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(kms_key_id.as_str());
        }

        put.send()
            .await
            .with_context(|| format!("failed to put s3://{bucket}/{key}"))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete s3://{bucket}/{key}"))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<BatchDeleteOutcome> {
        let identifiers = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("invalid object identifier")?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .context("invalid batch delete request")?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .with_context(|| format!("failed to batch delete from s3://{bucket}"))?;

        Ok(BatchDeleteOutcome {
            deleted: resp
                .deleted()
                .iter()
                .filter_map(|d| d.key().map(str::to_string))
                .collect(),
            errors: resp
                .errors()
                .iter()
                .map(|e| BatchDeleteError {
                    key: e.key().unwrap_or_default().to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                })
                .collect(),
        })
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let resp = self
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("failed to resolve region of bucket {bucket}"))?;

        resp.bucket_region()
            .map(str::to_string)
            .with_context(|| format!("bucket {bucket} reported no region"))
    }
}
