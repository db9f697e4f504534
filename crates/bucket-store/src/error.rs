//! Error types for the bucket store adapter

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum StoreError {
    /// Backend object store call failed
    Backend(Box<object_store::Error>),
    /// The body being written failed or ended early
    Body(std::io::Error),
    /// Declared length did not match the bytes received
    LengthMismatch { expected: u64, actual: u64 },
    /// Write did not finish before its deadline
    Timeout(Duration),
    /// Bucket probe or creation failed
    Provision(String),
    /// Store could not be configured
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(err) => write!(f, "Object store error: {}", err),
            StoreError::Body(err) => write!(f, "Body stream error: {}", err),
            StoreError::LengthMismatch { expected, actual } => write!(
                f,
                "Body length mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            StoreError::Timeout(deadline) => {
                write!(f, "Write did not finish within {:?}", deadline)
            }
            StoreError::Provision(msg) => write!(f, "Bucket provisioning error: {}", msg),
            StoreError::Config(msg) => write!(f, "Store configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Backend(err) => Some(err.as_ref()),
            StoreError::Body(err) => Some(err),
            _ => None,
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Provision(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
