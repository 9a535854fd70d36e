#![doc = "S3 integration for the CLI: implements the core `ObjectStore` trait with the AWS SDK."]
//
//! # S3 object store
//!
//! [`S3Store`] is the production [`ObjectStore`] used by the CLI. It is built
//! from the `aws` config section:
//!
//! - static access-key/secret credentials and a region (no profile or IMDS lookup),
//! - an optional custom endpoint for S3-compatible stores,
//! - a credential check through STS `GetCallerIdentity` before the first upload.
//!
//! Files below the multipart threshold go up in a single `PutObject`; larger
//! files use a multipart upload that is aborted if any part fails. Every upload
//! asks S3 to store a SHA-256 checksum.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info};

use full_backup2s3_core::contract::{ObjectStore, StoreError};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// S3 refuses multipart parts smaller than this (except the last one).
pub const MIN_PART_SIZE: u64 = 5 * BYTES_PER_MB;

/// S3 limit on the number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// The `aws` config section.
#[derive(Clone, Deserialize)]
pub struct AwsSection {
    pub region_name: String,
    pub bucket_name: String,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_verify_credentials")]
    pub verify_credentials: bool,
    #[serde(default = "default_part_mb")]
    pub multipart_threshold_mb: u64,
    #[serde(default = "default_part_mb")]
    pub multipart_chunk_mb: u64,
}

fn default_verify_credentials() -> bool {
    true
}

fn default_part_mb() -> u64 {
    8
}

impl fmt::Debug for AwsSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSection")
            .field("region_name", &self.region_name)
            .field("bucket_name", &self.bucket_name)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field(
                "aws_secret_access_key",
                &self.aws_secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("key_prefix", &self.key_prefix)
            .field("verify_credentials", &self.verify_credentials)
            .field("multipart_threshold_mb", &self.multipart_threshold_mb)
            .field("multipart_chunk_mb", &self.multipart_chunk_mb)
            .finish()
    }
}

impl AwsSection {
    pub fn trace_loaded(&self) {
        info!(
            region = %self.region_name,
            bucket = %self.bucket_name,
            endpoint = self.endpoint_url.as_deref().unwrap_or("<aws>"),
            key_prefix = %self.key_prefix,
            access_key_set = self.aws_access_key_id.is_some(),
            "Loaded aws section"
        );
    }
}

/// Part size for a file: the configured size, raised to the S3 minimum and to
/// whatever keeps the upload within [`MAX_PARTS`].
pub fn part_size_for(file_size: u64, configured: u64) -> u64 {
    configured
        .max(MIN_PART_SIZE)
        .max(file_size.div_ceil(MAX_PARTS))
}

/// Empty files always go up in a single `PutObject`; a multipart upload needs at least one part.
pub fn uses_multipart(file_size: u64, threshold: u64) -> bool {
    file_size > 0 && file_size >= threshold
}

fn sdk_error<E, R>(operation: &str, err: aws_sdk_s3::error::SdkError<E, R>) -> StoreError
where
    E: std::error::Error + 'static,
    R: fmt::Debug,
{
    format!("{operation} failed: {}", DisplayErrorContext(&err)).into()
}

pub struct S3Store {
    s3: aws_sdk_s3::Client,
    sts: aws_sdk_sts::Client,
    verify: bool,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3Store {
    /// Builds the S3 and STS clients. No network calls are made here.
    pub async fn connect(section: &AwsSection) -> Result<Self> {
        let access_key = section
            .aws_access_key_id
            .clone()
            .context("aws_access_key_id is not configured")?;
        let secret_key = section
            .aws_secret_access_key
            .clone()
            .context("aws_secret_access_key is not configured")?;
        let credentials = Credentials::new(access_key, secret_key, None, None, "full-backup2s3");

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(section.region_name.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &section.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(section.force_path_style)
            .build();

        info!(
            region = %section.region_name,
            endpoint = section.endpoint_url.as_deref().unwrap_or("<aws>"),
            "Initialized S3 client"
        );

        Ok(S3Store {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
            verify: section.verify_credentials,
            multipart_threshold: section.multipart_threshold_mb.saturating_mul(BYTES_PER_MB),
            part_size: section.multipart_chunk_mb.saturating_mul(BYTES_PER_MB),
        })
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path).await?;
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;
        Ok(())
    }

    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> Result<(), StoreError> {
        let part_size = part_size_for(size, self.part_size);
        let created = self
            .s3
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| sdk_error("CreateMultipartUpload", e))?;
        let upload_id = created
            .upload_id()
            .ok_or("CreateMultipartUpload returned no upload id")?
            .to_string();
        info!(key, upload_id = %upload_id, part_size, "Started multipart upload");

        let parts = match self
            .upload_parts(bucket, key, path, size, part_size, &upload_id)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, key, upload_id = %upload_id, "Multipart upload failed, aborting");
                if let Err(abort_err) = self
                    .s3
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    error!(
                        error = %DisplayErrorContext(&abort_err),
                        upload_id = %upload_id,
                        "Failed to abort multipart upload"
                    );
                }
                return Err(e);
            }
        };

        self.s3
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("CompleteMultipartUpload", e))?;
        info!(key, upload_id = %upload_id, "Completed multipart upload");
        Ok(())
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        part_size: u64,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let length = part_size.min(size - offset);
            let body = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await?;
            let uploaded = self
                .s3
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .checksum_algorithm(ChecksumAlgorithm::Sha256)
                .body(body)
                .send()
                .await
                .map_err(|e| sdk_error("UploadPart", e))?;
            debug!(key, part_number, offset, length, "Uploaded part");

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .set_checksum_sha256(uploaded.checksum_sha256().map(str::to_string))
                    .build(),
            );
            offset += length;
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn verify_credentials(&self) -> Result<String, StoreError> {
        if !self.verify {
            info!("Credential check disabled by config");
            return Ok("<not verified>".to_string());
        }
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| -> StoreError {
                format!("GetCallerIdentity failed: {}", aws_sdk_sts::error::DisplayErrorContext(&e))
                    .into()
            })?;
        let arn = identity.arn().unwrap_or("<unknown>").to_string();
        debug!(arn = %arn, account = identity.account().unwrap_or("<unknown>"), "Caller identity");
        Ok(arn)
    }

    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), StoreError> {
        let size = tokio::fs::metadata(path).await?.len();
        info!(file = %path.display(), bucket, key, size, "Start upload");
        if uses_multipart(size, self.multipart_threshold) {
            self.multipart_upload(bucket, key, path, size).await?;
        } else {
            self.put_file(bucket, key, path).await?;
        }
        debug!(file = %path.display(), "End upload");
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: &str) -> Result<(), StoreError> {
        info!(bucket, key, "Put object");
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("text/plain")
            .body(ByteStream::from(body.as_bytes().to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;
        Ok(())
    }
}
