//! Opaque blob storage under the internal namespace

use crate::cache::with_deadline;
use crate::error::{ArtifactError, Result};
use crate::key::blob_key;
use bucket_store::{BucketStore, ByteStream, ObjectTags, StoreError, StoredObject};
use std::time::Duration;
use tracing::info;

/// Stores and retrieves named blobs without any freshness logic
pub struct BlobPassthrough {
    store: BucketStore,
    store_timeout: Duration,
    transfer_timeout: Duration,
}

impl BlobPassthrough {
    pub fn new(store: BucketStore, store_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            transfer_timeout,
        }
    }

    /// Stream an upload into `internal/<name>`, replacing any previous blob.
    /// Returns the stored size.
    pub async fn put(
        &self,
        name: &str,
        body: ByteStream,
        length: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<u64> {
        let key = blob_key(name)?;
        let tags = ObjectTags::new();
        let written = self
            .store
            .put(&key, body, length, &tags, content_type, self.transfer_timeout)
            .await;

        let size = match written {
            Ok(size) => size,
            // The upload itself was broken, not the store
            Err(StoreError::Body(e)) => {
                return Err(ArtifactError::InvalidRequest(format!(
                    "upload of {} interrupted: {}",
                    name, e
                )))
            }
            Err(e @ StoreError::LengthMismatch { .. }) => {
                return Err(ArtifactError::InvalidRequest(format!(
                    "upload of {} rejected: {}",
                    name, e
                )))
            }
            Err(e) => return Err(e.into()),
        };

        info!(key = %key, size, "Stored blob");
        Ok(size)
    }

    pub async fn get(&self, name: &str) -> Result<StoredObject> {
        let key = blob_key(name)?;
        with_deadline(self.store_timeout, self.store.get(&key))
            .await?
            .ok_or_else(|| ArtifactError::NotFound(format!("no blob named {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::read_all;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};

    fn passthrough(store: &BucketStore) -> BlobPassthrough {
        BlobPassthrough::new(store.clone(), Duration::from_secs(5), Duration::from_secs(5))
    }

    fn body(chunks: Vec<std::io::Result<Bytes>>) -> ByteStream {
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = BucketStore::in_memory();
        let blobs = passthrough(&store);

        let size = blobs
            .put(
                "build.log",
                body(vec![Ok(Bytes::from_static(b"line 1\n")), Ok(Bytes::from_static(b"line 2\n"))]),
                None,
                Some("text/plain"),
            )
            .await
            .unwrap();
        assert_eq!(size, 14);

        let blob = blobs.get("build.log").await.unwrap();
        assert_eq!(blob.size, 14);
        assert_eq!(blob.content_type.as_deref(), Some("text/plain"));
        assert_eq!(read_all(blob.body).await.unwrap(), b"line 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_put_replaces_existing_blob() {
        let store = BucketStore::in_memory();
        let blobs = passthrough(&store);

        blobs
            .put("a", body(vec![Ok(Bytes::from_static(b"first"))]), None, None)
            .await
            .unwrap();
        blobs
            .put("a", body(vec![Ok(Bytes::from_static(b"second"))]), None, None)
            .await
            .unwrap();

        let blob = blobs.get("a").await.unwrap();
        assert_eq!(read_all(blob.body).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = BucketStore::in_memory();
        let err = passthrough(&store).get("nope").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_interrupted_upload_is_rejected_and_not_stored() {
        let store = BucketStore::in_memory();
        let blobs = passthrough(&store);

        let err = blobs
            .put(
                "partial",
                body(vec![
                    Ok(Bytes::from_static(b"abc")),
                    Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "client went away",
                    )),
                ]),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidRequest(_)));
        assert!(matches!(
            blobs.get("partial").await.unwrap_err(),
            ArtifactError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_short_upload_is_rejected() {
        let store = BucketStore::in_memory();
        let err = passthrough(&store)
            .put("short", body(vec![Ok(Bytes::from_static(b"abc"))]), Some(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_stalled_upload_times_out() {
        let store = BucketStore::in_memory();
        let blobs = BlobPassthrough::new(
            store.clone(),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        let stalled = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abc"))])
            .chain(stream::pending())
            .boxed();
        let err = blobs.put("stalled", stalled, None, None).await.unwrap_err();

        assert!(matches!(err, ArtifactError::StoreUnavailable(_)));
        assert!(matches!(
            blobs.get("stalled").await.unwrap_err(),
            ArtifactError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let store = BucketStore::in_memory();
        let blobs = passthrough(&store);
        assert!(matches!(
            blobs.get("..").await.unwrap_err(),
            ArtifactError::InvalidRequest(_)
        ));
        assert!(blobs
            .put("", body(vec![]), None, None)
            .await
            .is_err());
    }
}
