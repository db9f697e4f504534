//! Object keys for cached artifacts and internal blobs

use crate::error::{ArtifactError, Result};
use bucket_store::ObjectKey;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Namespace for cached third-party artifacts
pub const ARTIFACT_PREFIX: &str = "3rdparty";
/// Namespace for opaque internal blobs
pub const INTERNAL_PREFIX: &str = "internal";

/// Stands in for an empty path segment (`a//b`, `dir/`). URL path segments
/// never contain a raw `#`, so it cannot clash with a real segment.
const EMPTY_SEGMENT: &str = "#";

/// Which transport is used to reach an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemePolicy {
    /// Always fetch over https, rewriting an explicit `http://`
    #[default]
    ForceHttps,
    /// Keep an explicit scheme, bare URLs use https
    DefaultHttps,
    /// Keep an explicit scheme, bare URLs use http
    DefaultHttp,
}

impl SchemePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemePolicy::ForceHttps => "force-https",
            SchemePolicy::DefaultHttps => "default-https",
            SchemePolicy::DefaultHttp => "default-http",
        }
    }

    fn resolve(&self, explicit: Option<&str>) -> Result<&'static str> {
        match (self, explicit) {
            (_, Some(other)) if other != "http" && other != "https" => Err(
                ArtifactError::InvalidRequest(format!("unsupported scheme: {}", other)),
            ),
            (SchemePolicy::ForceHttps, _) => Ok("https"),
            (_, Some("http")) => Ok("http"),
            (_, Some(_)) => Ok("https"),
            (SchemePolicy::DefaultHttps, None) => Ok("https"),
            (SchemePolicy::DefaultHttp, None) => Ok("http"),
        }
    }
}

impl FromStr for SchemePolicy {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "force-https" => Ok(SchemePolicy::ForceHttps),
            "default-https" => Ok(SchemePolicy::DefaultHttps),
            "default-http" => Ok(SchemePolicy::DefaultHttp),
            other => Err(ArtifactError::Config(format!(
                "unknown scheme policy: {}",
                other
            ))),
        }
    }
}

/// A requested artifact: the origin URL to fetch and the object key it is
/// cached under.
///
/// The key is `3rdparty/<host[:port]>/<path segments>[/?<query>]`: one key
/// part per URL path segment, empty segments kept as `#`, and the query as a
/// trailing `?`-prefixed part. The store percent-encodes `#` and `?`. Distinct
/// origin URLs never share a key; the scheme is not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    url: Url,
    object_key: ObjectKey,
}

impl ArtifactKey {
    /// Parse a requested URL, with or without a scheme
    pub fn parse(raw: &str, policy: SchemePolicy) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ArtifactError::InvalidRequest("empty artifact URL".into()));
        }

        // Proxies sometimes collapse `https://` to `https:/`
        let (explicit, rest) = match raw.split_once(":/") {
            Some((scheme, rest)) if looks_like_scheme(scheme) => {
                (Some(scheme.to_ascii_lowercase()), rest.trim_start_matches('/'))
            }
            _ => (None, raw),
        };

        let scheme = policy.resolve(explicit.as_deref())?;
        let mut url = Url::parse(&format!("{}://{}", scheme, rest))
            .map_err(|e| ArtifactError::InvalidRequest(format!("invalid URL {}: {}", raw, e)))?;
        url.set_fragment(None);

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ArtifactError::InvalidRequest(format!("URL has no host: {}", raw)))?
            .to_ascii_lowercase();
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ArtifactError::InvalidRequest(
                "credentials in artifact URLs are not supported".into(),
            ));
        }

        let mut segments = vec![ARTIFACT_PREFIX.to_string()];
        segments.push(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        });
        if url.path() != "/" {
            if let Some(path) = url.path_segments() {
                segments.extend(path.map(|s| match s {
                    "" => EMPTY_SEGMENT.to_string(),
                    s => s.to_string(),
                }));
            }
        }
        if let Some(query) = url.query() {
            segments.push(format!("?{}", query));
        }

        Ok(Self {
            url,
            object_key: ObjectKey::from_iter(segments),
        })
    }

    /// URL the origin is fetched from
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn object_key(&self) -> &ObjectKey {
        &self.object_key
    }

    pub fn as_str(&self) -> &str {
        self.object_key.as_ref()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object key for an internal blob. Names are single path segments.
pub fn blob_key(name: &str) -> Result<ObjectKey> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(ArtifactError::InvalidRequest(format!(
            "invalid blob name: {:?}",
            name
        )));
    }
    Ok(ObjectKey::from_iter([INTERNAL_PREFIX, name]))
}

fn looks_like_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
