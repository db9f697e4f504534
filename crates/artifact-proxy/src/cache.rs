//! Pull-through artifact cache
//!
//! Maps a requested URL to a stored object, decides whether the stored copy
//! is fresh, stale or missing, and on miss/stale streams the origin response
//! to the caller while writing it to the store.

use crate::error::{ArtifactError, Result};
use crate::key::ArtifactKey;
use crate::single_flight::KeyedLocks;
use crate::tee::tee;
use crate::types::{Artifact, CacheStatus};
use bucket_store::{BucketStore, ByteStream, ObjectTags};
use chrono::{DateTime, Utc};
use origin_fetcher::{OriginFetcher, OriginResponse, Revalidation};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Tag holding the origin validator (ETag)
pub const TAG_VALIDATOR: &str = "validator";
/// Tag holding the expiry instant as Unix seconds
pub const TAG_EXPIRE_AT: &str = "expireAt";

/// Tunables for the cache protocol
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Time an entry stays fresh after it was written
    pub ttl: Duration,
    /// Advance `expireAt` when a stale entry revalidates as unchanged
    pub refresh_on_revalidate: bool,
    /// Deadline for a single store round trip (tag read, object open)
    pub store_timeout: Duration,
    /// Deadline for a background store write fed by an origin response
    pub fill_timeout: Duration,
    /// Chunks buffered between the origin and the store write
    pub tee_capacity: usize,
    /// Bytes held in memory for a slow caller before spilling to disk
    pub tee_memory_limit: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            refresh_on_revalidate: false,
            store_timeout: Duration::from_secs(30),
            fill_timeout: Duration::from_secs(330),
            tee_capacity: 16,
            tee_memory_limit: 8 * 1024 * 1024,
        }
    }
}

/// Freshness metadata of a cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Empty when the origin sent no validator
    pub validator: String,
    pub expire_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(validator: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expire_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            validator: validator.into(),
            expire_at,
        }
    }

    /// Both tags are mandatory; anything else is a corrupt entry
    pub fn from_tags(tags: &ObjectTags) -> std::result::Result<Self, String> {
        let raw_expire_at = tags
            .get(TAG_EXPIRE_AT)
            .ok_or_else(|| format!("missing {} tag", TAG_EXPIRE_AT))?;
        let expire_at = raw_expire_at
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| format!("invalid {} tag: {:?}", TAG_EXPIRE_AT, raw_expire_at))?;
        let validator = tags
            .get(TAG_VALIDATOR)
            .ok_or_else(|| format!("missing {} tag", TAG_VALIDATOR))?;

        Ok(Self {
            validator: validator.to_string(),
            expire_at,
        })
    }

    pub fn to_tags(&self) -> ObjectTags {
        ObjectTags::new()
            .with(TAG_VALIDATOR, self.validator.clone())
            .with(TAG_EXPIRE_AT, self.expire_at.timestamp().to_string())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expire_at
    }

    /// An empty stored validator never matches: without one there is no way
    /// to tell the content is unchanged.
    fn matches(&self, validator: Option<&str>) -> bool {
        !self.validator.is_empty() && validator == Some(self.validator.as_str())
    }
}

/// The caching protocol. One instance is shared by all request handlers.
pub struct ArtifactCacheService {
    store: BucketStore,
    origin: Arc<dyn OriginFetcher>,
    locks: KeyedLocks,
    policy: CachePolicy,
}

impl ArtifactCacheService {
    pub fn new(store: BucketStore, origin: Arc<dyn OriginFetcher>, policy: CachePolicy) -> Self {
        Self {
            store,
            origin,
            locks: KeyedLocks::new(),
            policy,
        }
    }

    /// Serve `key` from the store, the origin, or both.
    ///
    /// The per-key guard is held from the tag read until any store write
    /// triggered by this call has finished, so concurrent requests for the
    /// same key wait and reuse the result instead of fetching again. The
    /// store write does not depend on how fast the caller reads its body.
    pub async fn fetch(&self, key: &ArtifactKey) -> Result<Artifact> {
        let guard = self.locks.lock(key.as_str()).await;

        let Some(tags) =
            with_deadline(self.policy.store_timeout, self.store.get_tags(key.object_key())).await?
        else {
            debug!(key = %key, url = %key.url(), "Cache miss");
            let response = self.origin.fetch(key.url()).await?;
            return Ok(self.fill(key, response, guard, CacheStatus::Miss));
        };

        let entry = CacheEntry::from_tags(&tags)
            .map_err(|reason| ArtifactError::InvalidCacheEntry(format!("{}: {}", key, reason)))?;

        if entry.is_fresh(Utc::now()) {
            drop(guard);
            debug!(key = %key, expire_at = %entry.expire_at, "Cache hit");
            return self.serve_stored(key, CacheStatus::Hit).await;
        }

        self.revalidate(key, entry, guard).await
    }

    async fn revalidate(
        &self,
        key: &ArtifactKey,
        entry: CacheEntry,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Artifact> {
        debug!(key = %key, expire_at = %entry.expire_at, "Cache entry stale, revalidating");

        let outcome = if entry.validator.is_empty() {
            Revalidation::Modified(self.origin.fetch(key.url()).await?)
        } else {
            self.origin.revalidate(key.url(), &entry.validator).await?
        };

        match outcome {
            Revalidation::Modified(response) if !entry.matches(response.validator.as_deref()) => {
                info!(
                    key = %key,
                    old_validator = %entry.validator,
                    new_validator = ?response.validator,
                    "Origin content changed"
                );
                Ok(self.fill(key, response, guard, CacheStatus::Refreshed))
            }
            _ => {
                debug!(key = %key, validator = %entry.validator, "Origin content unchanged");
                if self.policy.refresh_on_revalidate {
                    self.extend_expiry(key, &entry, guard).await;
                } else {
                    drop(guard);
                }
                self.serve_stored(key, CacheStatus::Revalidated).await
            }
        }
    }

    /// Tee the origin body: one branch for the caller, one written to the
    /// store in the background while `guard` is held.
    fn fill(
        &self,
        key: &ArtifactKey,
        response: OriginResponse,
        guard: OwnedMutexGuard<()>,
        status: CacheStatus,
    ) -> Artifact {
        let entry = CacheEntry::new(
            response.validator.unwrap_or_default(),
            Utc::now(),
            self.policy.ttl,
        );
        let (to_caller, to_store) = tee(
            response.body,
            self.policy.tee_capacity,
            self.policy.tee_memory_limit,
        );

        self.spawn_store_write(
            key,
            to_store,
            response.content_length,
            entry.to_tags(),
            response.content_type.clone(),
            guard,
        );

        Artifact {
            body: to_caller,
            content_type: response.content_type,
            content_length: response.content_length,
            status,
        }
    }

    /// Rewrite the stored object with a later `expireAt`. Failures only cost
    /// an extra revalidation next time, so they are logged and swallowed.
    async fn extend_expiry(&self, key: &ArtifactKey, entry: &CacheEntry, guard: OwnedMutexGuard<()>) {
        let stored =
            match with_deadline(self.policy.store_timeout, self.store.get(key.object_key())).await {
                Ok(Some(stored)) => stored,
                Ok(None) => {
                    warn!(key = %key, "Entry disappeared before its expiry could be extended");
                    return;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read entry for expiry extension");
                    return;
                }
            };

        let refreshed = CacheEntry::new(entry.validator.clone(), Utc::now(), self.policy.ttl);
        debug!(key = %key, expire_at = %refreshed.expire_at, "Extending cache entry expiry");

        self.spawn_store_write(
            key,
            stored.body,
            Some(stored.size),
            refreshed.to_tags(),
            stored.content_type,
            guard,
        );
    }

    fn spawn_store_write(
        &self,
        key: &ArtifactKey,
        body: ByteStream,
        length: Option<u64>,
        tags: ObjectTags,
        content_type: Option<String>,
        guard: OwnedMutexGuard<()>,
    ) {
        let store = self.store.clone();
        let object_key = key.object_key().clone();
        let deadline = self.policy.fill_timeout;

        tokio::spawn(async move {
            let written = store
                .put(&object_key, body, length, &tags, content_type.as_deref(), deadline)
                .await;
            match written {
                Ok(size) => info!(key = %object_key, size, "Cached artifact"),
                Err(e) => warn!(key = %object_key, error = %e, "Failed to cache artifact"),
            }
            drop(guard);
        });
    }

    async fn serve_stored(&self, key: &ArtifactKey, status: CacheStatus) -> Result<Artifact> {
        let stored = with_deadline(self.policy.store_timeout, self.store.get(key.object_key()))
            .await?
            .ok_or_else(|| {
                ArtifactError::StoreUnavailable(format!("{} disappeared before it could be read", key))
            })?;

        Ok(Artifact {
            body: stored.body,
            content_type: stored.content_type,
            content_length: Some(stored.size),
            status,
        })
    }
}

/// Bound a store call; a timeout is reported as `StoreUnavailable`
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    op: impl Future<Output = bucket_store::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ArtifactError::StoreUnavailable(format!(
            "object store did not respond within {:?}",
            deadline
        ))),
    }
}
