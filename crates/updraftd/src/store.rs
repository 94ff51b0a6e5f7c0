//! Disk-backed demo handler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use updraft_gateway::UploadHandler;

/// Streams every request body into a numbered file under the data
/// directory and answers with a small JSON receipt.
///
/// This is the reference consumer for the gateway: it reads one contiguous
/// body per upload, no matter how many transactions delivered it.
pub struct FileStore {
    data_dir: PathBuf,
    sequence: AtomicU64,
}

impl FileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            sequence: AtomicU64::new(0),
        }
    }

    async fn store(&self, body: Body) -> std::io::Result<(PathBuf, u64)> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self.data_dir.join(format!("upload-{id:06}.bin"));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        let mut stream = body.into_data_stream();
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(std::io::Error::other)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok((path, written))
    }
}

#[async_trait]
impl UploadHandler for FileStore {
    async fn handle(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        match self.store(body).await {
            Ok((path, bytes)) => {
                info!(path = %path.display(), bytes, uri = %parts.uri, "upload stored");
                Json(serde_json::json!({
                    "stored": path.display().to_string(),
                    "bytes": bytes,
                }))
                .into_response()
            }
            Err(error) => {
                warn!(uri = %parts.uri, %error, "upload failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("upload failed: {error}"),
                )
                    .into_response()
            }
        }
    }
}
