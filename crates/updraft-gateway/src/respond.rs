//! Protocol response construction.
//!
//! Every response that concerns a known upload carries
//! `Upload-Draft-Interop-Version` (when the upload was opened with one), so
//! clients can detect version skew on any exchange.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::header::{HeaderName, HeaderValue, CACHE_CONTROL, LOCATION};
use http::{HeaderMap, StatusCode};
use updraft_core::{ProtocolError, Upload, UploadStatus};
use updraft_field::{
    serialize_boolean, serialize_integer, UPLOAD_DRAFT_INTEROP_VERSION, UPLOAD_INCOMPLETE,
    UPLOAD_LENGTH, UPLOAD_OFFSET,
};

/// `104 Upload Resumption Supported` — the interim response the draft uses
/// to tell a client mid-request that the upload can be resumed.
pub const INTERIM_RESUMPTION_STATUS: u16 = 104;

/// Lowest interop version that defines the 104 interim response.
const MIN_INTERIM_VERSION: u64 = 3;

/// The interim response a host should write for this upload, if its HTTP
/// stack can emit informational responses at all. axum's single-response
/// model cannot, so the axum front skips this; hosts driving hyper
/// directly can send it between request headers and final response.
pub fn interim_resumption_response(interop_version: Option<u64>) -> Option<http::Response<()>> {
    let version = interop_version.filter(|v| *v >= MIN_INTERIM_VERSION)?;
    let mut response = http::Response::new(());
    *response.status_mut() = StatusCode::from_u16(INTERIM_RESUMPTION_STATUS).ok()?;
    response.headers_mut().insert(
        HeaderName::from_static(UPLOAD_DRAFT_INTEROP_VERSION),
        HeaderValue::from(version),
    );
    Some(response)
}

fn name(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

fn interop_header(headers: &mut HeaderMap, record: &Upload) {
    if let Some(version) = record.interop_version() {
        headers.insert(name(UPLOAD_DRAFT_INTEROP_VERSION), HeaderValue::from(version));
    }
}

/// 201 for a transaction that left the upload incomplete (clean partial
/// close or truthful transport-failure answer): the drained offset and
/// `Upload-Incomplete: ?1`, plus `Location` on creation.
pub(crate) fn partial(record: &Upload, offset: u64, location: Option<String>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(name(UPLOAD_OFFSET), int_value(offset));
    headers.insert(name(UPLOAD_INCOMPLETE), bool_value(true));
    interop_header(&mut headers, record);
    if let Some(location) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        headers.insert(LOCATION, location);
    }
    (StatusCode::CREATED, headers, Body::empty()).into_response()
}

/// 201 for a transaction that completed the upload and answers at the
/// protocol level (the handler's response was not yet written).
pub(crate) fn completed(record: &Upload, offset: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(name(UPLOAD_OFFSET), int_value(offset));
    headers.insert(name(UPLOAD_INCOMPLETE), bool_value(false));
    interop_header(&mut headers, record);
    (StatusCode::CREATED, headers, Body::empty()).into_response()
}

/// 204 offset retrieval: committed offset, incompleteness, declared length
/// when known. `no-store` keeps intermediaries from serving a stale offset.
pub(crate) fn offset_retrieval(record: &Upload, status: &UploadStatus) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(name(UPLOAD_OFFSET), int_value(status.offset));
    headers.insert(name(UPLOAD_INCOMPLETE), bool_value(status.incomplete()));
    if let Some(length) = status.total_length {
        headers.insert(name(UPLOAD_LENGTH), int_value(length));
    }
    interop_header(&mut headers, record);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    (StatusCode::NO_CONTENT, headers, Body::empty()).into_response()
}

/// 204 for a successful cancel.
pub(crate) fn cancelled(record: &Upload) -> Response {
    let mut headers = HeaderMap::new();
    interop_header(&mut headers, record);
    (StatusCode::NO_CONTENT, headers, Body::empty()).into_response()
}

/// Deliver the downstream handler's response, stamped with the upload
/// headers the client needs to close its bookkeeping.
pub(crate) fn deliver(
    mut response: Response,
    record: &Upload,
    offset: u64,
    location: Option<String>,
) -> Response {
    let headers = response.headers_mut();
    headers.insert(name(UPLOAD_OFFSET), int_value(offset));
    headers.insert(
        name(UPLOAD_INCOMPLETE),
        bool_value(record.status().incomplete()),
    );
    interop_header(headers, record);
    if let Some(location) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        headers.insert(LOCATION, location);
    }
    response
}

/// Deliver a held response on an offset-retrieval: status and headers only.
pub(crate) fn deliver_head(response: Response, record: &Upload, offset: u64) -> Response {
    let (mut parts, _body) = deliver(response, record, offset, None).into_parts();
    parts.headers.remove(http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::empty())
}

/// Map a protocol error to its response. A 409 offset mismatch additionally
/// reports the upload's real offset so the client can resume without a
/// separate retrieval.
pub(crate) fn error(err: &ProtocolError, record: Option<&Upload>) -> Response {
    let mut headers = HeaderMap::new();
    if let ProtocolError::OffsetMismatch { expected, .. } = err {
        headers.insert(name(UPLOAD_OFFSET), int_value(*expected));
    }
    if let Some(record) = record {
        interop_header(&mut headers, record);
    }
    (err.status(), headers, Body::from(err.to_string())).into_response()
}

fn int_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&serialize_integer(value))
        .unwrap_or_else(|_| HeaderValue::from_static("0"))
}

fn bool_value(value: bool) -> HeaderValue {
    HeaderValue::from_static(serialize_boolean(value))
}
