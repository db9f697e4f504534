//! Outbound artifact retrieval

use crate::error::{OriginError, Result};
use crate::types::{OriginResponse, Revalidation};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves artifacts from their origin.
///
/// One outbound call per invocation, no retries.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Unconditional GET
    async fn fetch(&self, url: &Url) -> Result<OriginResponse>;

    /// Conditional GET against a known validator. The default performs a
    /// plain fetch and lets the caller compare validators.
    async fn revalidate(&self, url: &Url, _validator: &str) -> Result<Revalidation> {
        self.fetch(url).await.map(Revalidation::Modified)
    }
}

/// `reqwest`-backed fetcher.
///
/// Redirects follow the client's default policy; the request timeout covers
/// the whole exchange including the body.
pub struct HttpOriginFetcher {
    client: Client,
}

impl HttpOriginFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .user_agent(concat!("artifact-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OriginError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &Url, validator: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url.clone());
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }

        debug!(url = %url, conditional = validator.is_some(), "Fetching from origin");
        Ok(request.send().await?)
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, url: &Url) -> Result<OriginResponse> {
        let response = self.send(url, None).await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Origin fetch failed");
            return Err(status_error(url, response.status()));
        }

        Ok(into_origin_response(response))
    }

    async fn revalidate(&self, url: &Url, validator: &str) -> Result<Revalidation> {
        let response = self.send(url, Some(validator)).await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, validator, "Origin reports not modified");
            return Ok(Revalidation::NotModified);
        }
        if !status.is_success() {
            warn!(status = %status, url = %url, "Origin revalidation failed");
            return Err(status_error(url, status));
        }

        Ok(Revalidation::Modified(into_origin_response(response)))
    }
}

fn status_error(url: &Url, status: StatusCode) -> OriginError {
    OriginError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    }
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn into_origin_response(response: reqwest::Response) -> OriginResponse {
    let validator = header_value(response.headers(), ETAG);
    let content_type = header_value(response.headers(), CONTENT_TYPE);
    let content_length = response.content_length();

    debug!(
        url = %response.url(),
        content_length = ?content_length,
        validator = ?validator,
        "Origin responded"
    );

    OriginResponse {
        body: response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed(),
        content_length,
        validator,
        content_type,
    }
}
