//! Core types for the artifact proxy

use bucket_store::ByteStream;
use std::fmt;

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh stored entry
    Hit,
    /// No entry existed; fetched from origin and stored
    Miss,
    /// Entry was stale but the origin confirmed it unchanged
    Revalidated,
    /// Entry was stale and the origin returned new content
    Refreshed,
}

impl CacheStatus {
    /// Value of the `X-Cache` response header
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Refreshed => "REFRESHED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact ready to be streamed to the caller
pub struct Artifact {
    pub body: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub status: CacheStatus,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
