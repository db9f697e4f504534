//! Error types for the origin fetcher

use std::fmt;

#[derive(Debug)]
pub enum OriginError {
    /// Transport failure (connect, TLS, timeout, redirect limit)
    Http(Box<reqwest::Error>),
    /// Origin answered with a non-success status
    Status { url: String, status: u16 },
    /// Origin fetcher could not be configured
    Config(String),
}

impl fmt::Display for OriginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginError::Http(err) => write!(f, "HTTP error: {}", err),
            OriginError::Status { url, status } => {
                write!(f, "Origin {} returned status {}", url, status)
            }
            OriginError::Config(msg) => write!(f, "Origin configuration error: {}", msg),
        }
    }
}

impl std::error::Error for OriginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OriginError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OriginError {
    fn from(err: reqwest::Error) -> Self {
        OriginError::Http(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, OriginError>;
