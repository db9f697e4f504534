//! Artifact Proxy - pull-through cache for third-party artifacts
//!
//! Serves `/3rdparty/<url>` from an S3 bucket, fetching from the origin on
//! miss or when the stored copy has expired and changed, and stores opaque
//! blobs under `/internal/<name>`.

use artifact_proxy::{
    start_server, AppState, ArtifactCacheService, ArtifactError, BlobPassthrough, Config, Result,
    SharedState,
};
use bucket_store::BucketStore;
use origin_fetcher::HttpOriginFetcher;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("artifact_proxy=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!(version = artifact_proxy::VERSION, "Starting Artifact Proxy...");

    let config = Config::from_env()?;
    info!("Port: {}", config.port);
    info!("Bucket: {} at {}", config.s3.bucket, config.s3.endpoint_url());
    info!("Artifact TTL: {} seconds", config.ttl.as_secs());
    info!("Scheme policy: {}", config.scheme_policy.as_str());
    info!("Refresh on revalidate: {}", config.refresh_on_revalidate);

    let store = BucketStore::s3(&config.s3)?;
    store.ensure_bucket().await?;

    let origin = HttpOriginFetcher::new(config.origin_timeout)
        .map_err(|e| ArtifactError::Config(e.to_string()))?;

    let state: SharedState = Arc::new(AppState {
        artifacts: ArtifactCacheService::new(store.clone(), Arc::new(origin), config.cache_policy()),
        blobs: BlobPassthrough::new(
            store,
            config.store_timeout,
            config.origin_timeout + config.store_timeout,
        ),
        scheme_policy: config.scheme_policy,
    });

    // Start HTTP server (blocking until shutdown)
    start_server(state, config.port)
        .await
        .map_err(|e| ArtifactError::Config(format!("Server error: {}", e)))?;

    info!("Artifact Proxy stopped");
    Ok(())
}
