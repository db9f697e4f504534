//! Origin fetcher
//!
//! Retrieves third-party artifacts over HTTP and exposes the body as a stream
//! together with its declared length and ETag validator.

pub mod error;
pub mod fetcher;
pub mod types;

pub use error::{OriginError, Result};
pub use fetcher::{HttpOriginFetcher, OriginFetcher};
pub use types::{ByteStream, OriginResponse, Revalidation};
