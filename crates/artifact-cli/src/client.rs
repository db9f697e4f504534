//! HTTP client for the proxy's internal blob endpoints

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Response};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

pub struct BlobClient {
    http: Client,
    api_url: Url,
}

impl BlobClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = Url::parse(api_url).with_context(|| format!("invalid API URL {}", api_url))?;
        if api_url.cannot_be_a_base() {
            bail!("invalid API URL {}", api_url);
        }

        let http = Client::builder()
            .user_agent(concat!("artifact-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, api_url })
    }

    fn blob_url(&self, name: &str) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid API URL {}", self.api_url))?
            .pop_if_empty()
            .extend(["internal", name]);
        Ok(url)
    }

    /// Stream a local file to `/internal/<file name>` and return the server's
    /// reply.
    pub async fn upload(&self, path: &Path) -> Result<String> {
        let name = blob_name(path)?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let size = file.metadata().await?.len();
        let url = self.blob_url(name)?;

        debug!(url = %url, size, "Uploading blob");
        let response = self
            .http
            .post(url)
            .header(CONTENT_LENGTH, size)
            .body(Body::from(file))
            .send()
            .await?;
        let response = check(response).await?;

        Ok(response.text().await?.trim().to_string())
    }

    /// Download `/internal/<name>` into `dest`, returning the bytes written.
    /// A partially written file is removed on failure.
    pub async fn download(&self, name: &str, dest: &Path) -> Result<u64> {
        let url = self.blob_url(name)?;
        debug!(url = %url, dest = %dest.display(), "Downloading blob");

        let response = check(self.http.get(url).send().await?).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let written = match copy_body(response, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e);
            }
        };

        Ok(written)
    }
}

async fn copy_body(response: Response, file: &mut tokio::fs::File) -> Result<u64> {
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Non-2xx replies become errors carrying the server's message
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    bail!("server returned {}: {}", status, message.trim())
}

/// Blobs are named after the file, without its directory
pub fn blob_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Path as UrlPath, State},
        http::StatusCode,
        routing::get,
        Router,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Blobs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    async fn put(
        State(blobs): State<Blobs>,
        UrlPath(name): UrlPath<String>,
        body: Bytes,
    ) -> (StatusCode, String) {
        let size = body.len();
        blobs.lock().unwrap().insert(name.clone(), body.to_vec());
        (StatusCode::CREATED, format!("Stored internal/{} ({} bytes)\n", name, size))
    }

    async fn fetch(
        State(blobs): State<Blobs>,
        UrlPath(name): UrlPath<String>,
    ) -> Result<Vec<u8>, (StatusCode, String)> {
        blobs
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or((StatusCode::NOT_FOUND, format!("Not found: no blob named {}", name)))
    }

    async fn spawn_server() -> (String, Blobs) {
        let blobs: Blobs = Arc::default();
        let router = Router::new()
            .route("/internal/{name}", get(fetch).post(put))
            .with_state(blobs.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), blobs)
    }

    #[test]
    fn test_blob_url() {
        let client = BlobClient::new("http://proxy.local:8089/").unwrap();
        assert_eq!(
            client.blob_url("build log.txt").unwrap().as_str(),
            "http://proxy.local:8089/internal/build%20log.txt"
        );

        let client = BlobClient::new("http://proxy.local/artifacts").unwrap();
        assert_eq!(
            client.blob_url("a.bin").unwrap().as_str(),
            "http://proxy.local/artifacts/internal/a.bin"
        );
    }

    #[test]
    fn test_blob_name_strips_directories() {
        assert_eq!(blob_name(Path::new("target/release/app.tar.gz")).unwrap(), "app.tar.gz");
        assert!(blob_name(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (api_url, blobs) = spawn_server().await;
        let client = BlobClient::new(&api_url).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let source = dir.path().join("report.txt");
        tokio::fs::write(&source, b"all green").await.unwrap();

        let reply = client.upload(&source).await.unwrap();
        assert_eq!(reply, "Stored internal/report.txt (9 bytes)");
        assert_eq!(blobs.lock().unwrap()["report.txt"], b"all green");

        let dest = dir.path().join("copy.txt");
        let written = client.download("report.txt", &dest).await.unwrap();
        assert_eq!(written, 9);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"all green");
    }

    #[tokio::test]
    async fn test_missing_blob_reports_server_message() {
        let (api_url, _) = spawn_server().await;
        let client = BlobClient::new(&api_url).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.bin");

        let err = client.download("missing.bin", &dest).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("no blob named missing.bin"));
        assert!(!dest.exists());
    }
}
