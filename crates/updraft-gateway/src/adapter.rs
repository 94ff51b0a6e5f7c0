//! Downstream request synthesis.
//!
//! The application handler observes exactly one request per upload: the
//! creation transaction's method, URI, and headers, minus everything that
//! is transaction-scoped, with a body that is the concatenation of every
//! append. The handler task is decoupled from any single HTTP transaction;
//! its response lands in the entry's slot for whichever transaction can
//! carry it.

use std::sync::Arc;

use axum::body::Body;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::request::Parts;
use http::Request;
use tracing::debug;
use updraft_core::{TerminateReason, UploadState};
use updraft_field::strip_upload_headers;

use crate::gateway::{Gateway, UploadEntry};

impl Gateway {
    /// Spawn the single downstream handler task for a freshly created
    /// upload. A record whose body was already taken (replace-policy race)
    /// is left alone.
    pub(crate) fn spawn_downstream(self: &Arc<Self>, entry: &UploadEntry, parts: Parts) {
        let Some(body) = entry.record().take_body() else {
            return;
        };
        let total_length = entry.record().status().total_length;
        let request = synthesize_request(parts, Body::from_stream(body), total_length);

        let handler = self.handler();
        let record = entry.record().clone();
        let slot = entry.response_slot();
        let task = tokio::spawn(async move {
            let response = handler.handle(request).await;
            let complete = matches!(record.state(), UploadState::Complete);
            debug!(
                token = %record.token(),
                status = %response.status(),
                complete,
                "downstream handler returned"
            );
            if slot.set(response).is_ok() && !complete {
                // Early return, success or failure: the upload accepts no
                // more bytes, and the held response explains why.
                record.terminate(TerminateReason::HandlerFinished);
            }
        });
        entry.set_abort(task.abort_handle());
    }
}

/// Build the logical request the application sees.
///
/// The five upload headers are stripped — they describe the transaction,
/// not the logical request — and so are `Content-Length` and
/// `Transfer-Encoding`, which belong to the creation transaction's framing.
/// When the client declared `Upload-Length`, that is the logical body size
/// and becomes the synthesized `Content-Length`.
fn synthesize_request(mut parts: Parts, body: Body, total_length: Option<u64>) -> Request<Body> {
    strip_upload_headers(&mut parts.headers);
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(TRANSFER_ENCODING);
    if let Some(length) = total_length {
        parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    Request::from_parts(parts, body)
}
