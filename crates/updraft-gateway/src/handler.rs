//! The downstream application handler seam.

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::Request;

/// The application side of the gateway.
///
/// For a resumable upload the handler is invoked exactly once, with a
/// synthesized request whose body is the concatenation of every append in
/// admission order; the upload headers are stripped. The handler neither
/// knows nor cares that the body arrived over many HTTP transactions — it
/// reads one serial stream whose total size is the upload's final size.
///
/// Non-resumable requests are passed through verbatim, so one
/// implementation serves both paths.
///
/// The body stream pends while an upload is between appends and yields an
/// error item if the upload is cancelled; returning early (before EOF)
/// concludes the upload from the gateway's point of view.
#[async_trait]
pub trait UploadHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request<Body>) -> Response;
}

#[async_trait]
impl<F, Fut> UploadHandler for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: Request<Body>) -> Response {
        (self)(request).await
    }
}
