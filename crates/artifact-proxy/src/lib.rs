//! Artifact proxy
//!
//! A pull-through cache for third-party artifacts and a passthrough store for
//! internal blobs, both backed by one S3 bucket.

pub mod blobs;
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod server;
pub mod single_flight;
pub mod tee;
pub mod types;

#[cfg(test)]
mod testing;

pub use blobs::BlobPassthrough;
pub use cache::{ArtifactCacheService, CacheEntry, CachePolicy};
pub use config::Config;
pub use error::{ArtifactError, Result};
pub use key::{ArtifactKey, SchemePolicy};
pub use server::{create_router, start_server, AppState, SharedState};
pub use types::{Artifact, CacheStatus};

/// Crate version reported by `/version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
