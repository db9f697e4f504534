//! Error types for the artifact proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// Request-scoped failures. None of these terminate the process.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("Invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArtifactError {
    pub fn status(&self) -> StatusCode {
        match self {
            ArtifactError::OriginUnavailable(_) => StatusCode::BAD_GATEWAY,
            ArtifactError::InvalidCacheEntry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ArtifactError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ArtifactError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ArtifactError::NotFound(_) => StatusCode::NOT_FOUND,
            ArtifactError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ArtifactError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }

        (status, self.to_string()).into_response()
    }
}

impl From<bucket_store::StoreError> for ArtifactError {
    fn from(err: bucket_store::StoreError) -> Self {
        ArtifactError::StoreUnavailable(err.to_string())
    }
}

impl From<origin_fetcher::OriginError> for ArtifactError {
    fn from(err: origin_fetcher::OriginError) -> Self {
        ArtifactError::OriginUnavailable(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for ArtifactError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ArtifactError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;
