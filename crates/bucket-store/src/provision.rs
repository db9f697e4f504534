//! Bucket provisioning for S3-compatible endpoints
//!
//! `object_store` has no bucket-level API, so the probe (HeadBucket) and the
//! creation (CreateBucket) are sent as presigned requests against the bucket
//! root.

use crate::error::{Result, StoreError};
use object_store::aws::AmazonS3;
use object_store::path::Path;
use object_store::signer::Signer;
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PRESIGN_TTL: Duration = Duration::from_secs(60);

pub struct BucketProvisioner {
    s3: Arc<AmazonS3>,
    bucket: String,
    client: Client,
}

impl BucketProvisioner {
    pub fn new(s3: Arc<AmazonS3>, bucket: String) -> Self {
        Self {
            s3,
            bucket,
            client: Client::new(),
        }
    }

    /// Create the bucket unless it already exists
    pub async fn ensure(&self) -> Result<()> {
        if self.bucket_exists().await? {
            debug!(bucket = %self.bucket, "Bucket already exists");
            return Ok(());
        }

        let url = self
            .s3
            .signed_url(Method::PUT, &Path::default(), PRESIGN_TTL)
            .await?;
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        match classify_create(response.status()) {
            CreateOutcome::Created => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            CreateOutcome::AlreadyPresent => {
                debug!(bucket = %self.bucket, "Bucket created concurrently");
                Ok(())
            }
            CreateOutcome::Failed(status) => Err(StoreError::Provision(format!(
                "creating bucket {} returned status {}",
                self.bucket, status
            ))),
        }
    }

    async fn bucket_exists(&self) -> Result<bool> {
        let url = self
            .s3
            .signed_url(Method::HEAD, &Path::default(), PRESIGN_TTL)
            .await?;
        let status = self.client.head(url).send().await?.status();

        probe_result(status).map_err(|status| {
            StoreError::Provision(format!(
                "probing bucket {} returned status {}",
                self.bucket, status
            ))
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CreateOutcome {
    Created,
    AlreadyPresent,
    Failed(StatusCode),
}

fn probe_result(status: StatusCode) -> std::result::Result<bool, StatusCode> {
    if status.is_success() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND {
        Ok(false)
    } else {
        Err(status)
    }
}

fn classify_create(status: StatusCode) -> CreateOutcome {
    if status.is_success() {
        CreateOutcome::Created
    } else if status == StatusCode::CONFLICT {
        // BucketAlreadyOwnedByYou
        CreateOutcome::AlreadyPresent
    } else {
        CreateOutcome::Failed(status)
    }
}
