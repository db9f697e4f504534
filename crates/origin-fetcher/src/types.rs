//! Origin response types

use bytes::Bytes;
use futures::stream::BoxStream;

/// A boxed stream of body chunks
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A successful origin response with its body still unread
pub struct OriginResponse {
    pub body: ByteStream,
    /// Declared `Content-Length`, if the origin sent one
    pub content_length: Option<u64>,
    /// Opaque freshness token (the `ETag` header)
    pub validator: Option<String>,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("content_length", &self.content_length)
            .field("validator", &self.validator)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Result of a conditional fetch against a known validator
#[derive(Debug)]
pub enum Revalidation {
    /// Origin confirmed the validator (HTTP 304)
    NotModified,
    /// Origin sent a full response; its validator may still match
    Modified(OriginResponse),
}
