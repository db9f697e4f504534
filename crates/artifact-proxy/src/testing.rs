//! Test doubles shared by the cache and router tests

use async_trait::async_trait;
use bucket_store::{BucketStore, ByteStream};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::RetryConfig;
use origin_fetcher::{OriginError, OriginFetcher, OriginResponse, Revalidation};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

struct StubState {
    /// None makes every request fail
    body: Option<Bytes>,
    validator: Option<String>,
    honour_conditionals: bool,
    break_midway: bool,
}

/// In-process origin that counts requests
pub(crate) struct StubOrigin {
    state: Mutex<StubState>,
    calls: AtomicUsize,
    conditional_calls: AtomicUsize,
}

impl StubOrigin {
    pub fn serving(body: &'static [u8], validator: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StubState {
                body: Some(Bytes::from_static(body)),
                validator: validator.map(str::to_string),
                honour_conditionals: true,
                break_midway: false,
            }),
            calls: AtomicUsize::new(0),
            conditional_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let origin = Self::serving(b"", None);
        origin.state.lock().unwrap().body = None;
        origin
    }

    /// Answer conditional requests with a full 200
    pub fn ignoring_conditionals(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().unwrap().honour_conditionals = false;
        self
    }

    /// Fail the body stream after the first half
    pub fn breaking_midway(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().unwrap().break_midway = true;
        self
    }

    pub fn set(&self, body: &'static [u8], validator: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.body = Some(Bytes::from_static(body));
        state.validator = validator.map(str::to_string);
    }

    /// Requests of any kind
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests that carried a validator
    pub fn conditional_calls(&self) -> usize {
        self.conditional_calls.load(Ordering::SeqCst)
    }

    fn respond(&self, url: &Url) -> origin_fetcher::Result<OriginResponse> {
        let state = self.state.lock().unwrap();
        let Some(body) = state.body.clone() else {
            return Err(OriginError::Status {
                url: url.to_string(),
                status: 503,
            });
        };

        let mid = body.len() / 2;
        let mut chunks = vec![Ok(body.slice(..mid))];
        if state.break_midway {
            chunks.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "origin reset",
            )));
        } else {
            chunks.push(Ok(body.slice(mid..)));
        }

        Ok(OriginResponse {
            body: stream::iter(chunks).boxed(),
            content_length: Some(body.len() as u64),
            validator: state.validator.clone(),
            content_type: Some("application/octet-stream".to_string()),
        })
    }
}

#[async_trait]
impl OriginFetcher for StubOrigin {
    async fn fetch(&self, url: &Url) -> origin_fetcher::Result<OriginResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.respond(url)
    }

    async fn revalidate(&self, url: &Url, validator: &str) -> origin_fetcher::Result<Revalidation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conditional_calls.fetch_add(1, Ordering::SeqCst);

        let unchanged = {
            let state = self.state.lock().unwrap();
            state.body.is_some()
                && state.honour_conditionals
                && state.validator.as_deref() == Some(validator)
        };
        if unchanged {
            return Ok(Revalidation::NotModified);
        }
        self.respond(url).map(Revalidation::Modified)
    }
}

/// S3 client pointed at `addr` that gives up on the first failure
fn s3_store_at(addr: SocketAddr) -> BucketStore {
    let s3 = AmazonS3Builder::new()
        .with_endpoint(format!("http://{}", addr))
        .with_allow_http(true)
        .with_access_key_id("test")
        .with_secret_access_key("test")
        .with_bucket_name("artifacts")
        .with_region("us-east-1")
        .with_retry(RetryConfig {
            max_retries: 0,
            retry_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .build()
        .unwrap();
    BucketStore::new(Arc::new(s3))
}

/// Store whose endpoint refuses connections
pub(crate) async fn refusing_store() -> BucketStore {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    s3_store_at(addr)
}

/// Store whose endpoint accepts connections and never answers. Keep the
/// listener alive for as long as the store is used.
pub(crate) async fn hanging_store() -> (BucketStore, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let store = s3_store_at(listener.local_addr().unwrap());
    (store, listener)
}

pub(crate) async fn read_all(body: ByteStream) -> std::io::Result<Vec<u8>> {
    body.map_ok(|chunk| chunk.to_vec()).try_concat().await
}
