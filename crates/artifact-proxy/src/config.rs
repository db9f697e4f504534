use crate::cache::CachePolicy;
use crate::error::{ArtifactError, Result};
use crate::key::SchemePolicy;
use bucket_store::S3Config;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub s3: S3Config,
    pub ttl: Duration,
    pub scheme_policy: SchemePolicy,
    pub refresh_on_revalidate: bool,
    pub origin_timeout: Duration,
    pub store_timeout: Duration,
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ArtifactError::Config(format!("{} is not set", name)))
        };

        let s3 = S3Config {
            endpoint: required("S3_ENDPOINT")?,
            access_key: required("S3_ACCESS_KEY")?,
            secret_key: required("S3_SECRET_KEY")?,
            bucket: required("S3_BUCKET")?,
            region: lookup("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        };

        let port = parsed(&lookup, "PORT")?.unwrap_or(8089);
        let ttl_secs: u64 = parsed(&lookup, "ARTIFACT_TTL_SECS")?.unwrap_or(60 * 60);
        let scheme_policy = parsed(&lookup, "ARTIFACT_SCHEME_POLICY")?.unwrap_or_default();
        let refresh_on_revalidate = match lookup("ARTIFACT_REFRESH_ON_REVALIDATE") {
            Some(v) => parse_bool("ARTIFACT_REFRESH_ON_REVALIDATE", &v)?,
            None => false,
        };
        let origin_timeout_secs: u64 = parsed(&lookup, "ORIGIN_TIMEOUT_SECS")?.unwrap_or(300);
        let store_timeout_secs: u64 = parsed(&lookup, "STORE_TIMEOUT_SECS")?.unwrap_or(30);

        Ok(Self {
            port,
            s3,
            ttl: Duration::from_secs(ttl_secs),
            scheme_policy,
            refresh_on_revalidate,
            origin_timeout: Duration::from_secs(origin_timeout_secs),
            store_timeout: Duration::from_secs(store_timeout_secs),
        })
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: self.ttl,
            refresh_on_revalidate: self.refresh_on_revalidate,
            store_timeout: self.store_timeout,
            fill_timeout: self.origin_timeout + self.store_timeout,
            ..CachePolicy::default()
        }
    }
}

/// Unset is `None`; set but unparseable is an error
fn parsed<T>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ArtifactError::Config(format!("invalid {} {:?}: {}", name, raw, e))),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ArtifactError::Config(format!(
            "invalid {} {:?}: expected true or false",
            name, other
        ))),
    }
}
