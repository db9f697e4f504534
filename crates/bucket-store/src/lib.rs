//! Object store adapter for the artifact proxy
//!
//! Wraps an `object_store` backend (S3/MinIO in production, in-memory in
//! tests) with the small capability set the proxy needs: existence checks,
//! user-metadata tags, streaming tagged writes and bucket provisioning.

mod error;
mod provision;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use object_store::path::Path as ObjectKey;
pub use store::BucketStore;
pub use types::{ByteStream, ObjectTags, S3Config, StoredObject};
