//! Tagged object storage on top of `object_store`

use crate::error::{Result, StoreError};
use crate::provision::BucketProvisioner;
use crate::types::{ByteStream, ObjectTags, S3Config, StoredObject};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, GetOptions, ObjectStore, PutMultipartOptions, PutOptions, PutPayload,
    WriteMultipart,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Parts allowed in flight per multipart upload before `put` stops pulling
/// from the body stream
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Object store adapter: existence checks, tag reads, streaming tagged writes
/// and bucket provisioning.
///
/// Writes go through a multipart upload, so an object only becomes visible
/// once the whole body has been committed.
#[derive(Clone)]
pub struct BucketStore {
    inner: Arc<dyn ObjectStore>,
    provisioner: Option<Arc<BucketProvisioner>>,
}

impl BucketStore {
    /// Wrap an existing backend. Bucket provisioning is a no-op.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            provisioner: None,
        }
    }

    /// Process-local backend, used by tests and local runs
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Connect to an S3-compatible endpoint (path-style addressing)
    pub fn s3(config: &S3Config) -> Result<Self> {
        let s3 = AmazonS3Builder::new()
            .with_endpoint(config.endpoint_url())
            .with_allow_http(true)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let s3 = Arc::new(s3);
        let provisioner = BucketProvisioner::new(Arc::clone(&s3), config.bucket.clone());

        Ok(Self {
            inner: s3,
            provisioner: Some(Arc::new(provisioner)),
        })
    }

    /// Create the bucket if it does not exist yet. Safe to call repeatedly.
    pub async fn ensure_bucket(&self) -> Result<()> {
        match &self.provisioner {
            Some(provisioner) => provisioner.ensure().await,
            None => Ok(()),
        }
    }

    pub async fn exists(&self, key: &Path) -> Result<bool> {
        match self.inner.head(key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the user metadata of an object, `None` when it does not exist
    pub async fn get_tags(&self, key: &Path) -> Result<Option<ObjectTags>> {
        let mut options = GetOptions::default();
        options.head = true;

        match self.inner.get_opts(key, options).await {
            Ok(result) => Ok(Some(tags_from_attributes(&result.attributes))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open an object for streaming, `None` when it does not exist
    pub async fn get(&self, key: &Path) -> Result<Option<StoredObject>> {
        let result = match self.inner.get(key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let tags = tags_from_attributes(&result.attributes);
        let content_type = result.attributes.get(&Attribute::ContentType).map(|v| {
            let v: &str = v.as_ref();
            v.to_string()
        });
        let size = result.meta.size as u64;
        let body = result.into_stream().map_err(std::io::Error::other).boxed();

        Ok(Some(StoredObject {
            tags,
            content_type,
            size,
            body,
        }))
    }

    /// Stream `body` into `key` with the given tags, replacing any existing
    /// object. Returns the number of bytes written.
    ///
    /// A body error, a byte count different from `length` when one is
    /// given, or the upload not finishing within `deadline` aborts the
    /// multipart upload and leaves the previous object in place.
    pub async fn put(
        &self,
        key: &Path,
        body: ByteStream,
        length: Option<u64>,
        tags: &ObjectTags,
        content_type: Option<&str>,
        deadline: Duration,
    ) -> Result<u64> {
        let expires = Instant::now() + deadline;
        let opts = PutMultipartOptions {
            attributes: attributes_for(tags, content_type),
            ..Default::default()
        };

        let upload = timeout_at(expires, self.inner.put_multipart_opts(key, opts))
            .await
            .map_err(|_| StoreError::Timeout(deadline))??;
        let mut writer = WriteMultipart::new(upload);

        let written = match timeout_at(expires, write_parts(&mut writer, body, length)).await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                abort_upload(writer, key).await;
                return Err(e);
            }
            Err(_) => {
                warn!(key = %key, ?deadline, "Upload deadline exceeded, aborting");
                abort_upload(writer, key).await;
                return Err(StoreError::Timeout(deadline));
            }
        };

        timeout_at(expires, writer.finish())
            .await
            .map_err(|_| StoreError::Timeout(deadline))??;
        debug!(key = %key, size = written, "Stored object");

        Ok(written)
    }

    /// Store an in-memory payload in a single request
    pub async fn put_bytes(
        &self,
        key: &Path,
        data: Bytes,
        tags: &ObjectTags,
        content_type: Option<&str>,
    ) -> Result<u64> {
        let size = data.len() as u64;
        let mut opts = PutOptions::default();
        opts.attributes = attributes_for(tags, content_type);

        self.inner
            .put_opts(key, PutPayload::from(data), opts)
            .await?;
        debug!(key = %key, size, "Stored object");

        Ok(size)
    }
}

/// Feed `body` into the upload and wait for every completed part to land
async fn write_parts(
    writer: &mut WriteMultipart,
    mut body: ByteStream,
    length: Option<u64>,
) -> Result<u64> {
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(StoreError::Body)?;
        writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
        written += chunk.len() as u64;
        writer.write(&chunk);
    }

    if let Some(expected) = length {
        if expected != written {
            return Err(StoreError::LengthMismatch {
                expected,
                actual: written,
            });
        }
    }

    writer.wait_for_capacity(0).await?;
    Ok(written)
}

async fn abort_upload(writer: WriteMultipart, key: &Path) {
    if let Err(e) = writer.abort().await {
        warn!(key = %key, error = %e, "Failed to abort multipart upload");
    }
}

fn tags_from_attributes(attributes: &Attributes) -> ObjectTags {
    let mut tags = ObjectTags::new();
    for (attribute, value) in attributes.iter() {
        if let Attribute::Metadata(name) = attribute {
            let value: &str = value.as_ref();
            tags.insert(name, value);
        }
    }
    tags
}

fn attributes_for(tags: &ObjectTags, content_type: Option<&str>) -> Attributes {
    let mut attributes = Attributes::new();
    for (name, value) in tags.iter() {
        attributes.insert(
            Attribute::Metadata(name.to_string().into()),
            value.to_string().into(),
        );
    }
    if let Some(content_type) = content_type {
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
    }
    attributes
}
