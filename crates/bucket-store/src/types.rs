//! Store types

use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

/// A boxed stream of body chunks
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// User metadata attached to a stored object.
///
/// S3 lowercases metadata names on the wire, so names are normalised to
/// lowercase on insert and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTags(BTreeMap<String, String>);

impl ObjectTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An object read back from the store
pub struct StoredObject {
    pub tags: ObjectTags,
    pub content_type: Option<String>,
    pub size: u64,
    pub body: ByteStream,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("tags", &self.tags)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL; a bare `host:port` is treated as plain http
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

impl S3Config {
    /// Endpoint with an explicit scheme
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}
