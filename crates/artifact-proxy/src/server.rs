//! HTTP server for the artifact proxy
//!
//! Provides /ready, /version, /internal/{name} and /3rdparty/{*url}.

use crate::blobs::BlobPassthrough;
use crate::cache::ArtifactCacheService;
use crate::error::Result;
use crate::key::{ArtifactKey, SchemePolicy};
use crate::types::Artifact;
use crate::VERSION;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state for the HTTP server
pub struct AppState {
    pub artifacts: ArtifactCacheService,
    pub blobs: BlobPassthrough,
    pub scheme_policy: SchemePolicy,
}

pub type SharedState = Arc<AppState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .route("/version", get(version))
        .route("/internal/{name}", get(get_blob).post(put_blob))
        .route("/3rdparty/{*url}", get(get_artifact))
        .layer(DefaultBodyLimit::disable())
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, returning once a shutdown signal was handled
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn ready() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    VERSION
}

/// Serve a third-party artifact through the cache
async fn get_artifact(
    State(state): State<SharedState>,
    Path(url): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let raw = match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}?{}", url, query),
        None => url,
    };
    let key = ArtifactKey::parse(&raw, state.scheme_policy)?;
    let artifact = state.artifacts.fetch(&key).await?;

    info!(key = %key, cache = %artifact.status, "Serving artifact");
    Ok(artifact_response(artifact))
}

async fn put_blob(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();

    let size = state.blobs.put(&name, body, length, content_type).await?;

    Ok((
        StatusCode::CREATED,
        format!("Stored internal/{} ({} bytes)\n", name, size),
    )
        .into_response())
}

async fn get_blob(State(state): State<SharedState>, Path(name): Path<String>) -> Result<Response> {
    let blob = state.blobs.get(&name).await?;

    Ok(stream_response(
        blob.body,
        blob.content_type.as_deref(),
        Some(blob.size),
        None,
    ))
}

fn artifact_response(artifact: Artifact) -> Response {
    stream_response(
        artifact.body,
        artifact.content_type.as_deref(),
        artifact.content_length,
        Some(artifact.status.as_str()),
    )
}

fn stream_response(
    body: bucket_store::ByteStream,
    content_type: Option<&str>,
    content_length: Option<u64>,
    cache_status: Option<&'static str>,
) -> Response {
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if let Some(status) = cache_status {
        builder = builder.header("X-Cache", status);
    }

    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
