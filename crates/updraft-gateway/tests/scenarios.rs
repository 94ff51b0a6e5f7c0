//! End-to-end protocol scenarios.
//!
//! Each test drives the gateway's axum router the way a client would:
//! creation, appends, offset retrieval, and cancellation across separate
//! HTTP transactions, with a collecting downstream handler asserting what
//! the application actually observes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{Method, Request, StatusCode};
use tower::ServiceExt;
use updraft_core::{GatewayConfig, UploadToken};
use updraft_gateway::{Gateway, UploadHandler};

// ── Test harness ────────────────────────────────────────────────────

/// One request as observed by the downstream handler.
#[derive(Debug, Clone)]
struct Observed {
    method: Method,
    path: String,
    content_length: Option<String>,
    upload_token_header: bool,
    body: Vec<u8>,
    body_errored: bool,
}

/// Downstream handler that drains the whole body, records what it saw,
/// and answers 200. The small response delay keeps completion responses
/// deterministic: the completing append answers at the protocol level
/// before the handler's response exists.
#[derive(Clone)]
struct Collector {
    observed: Arc<Mutex<Vec<Observed>>>,
    response_delay: Duration,
}

impl Collector {
    fn new() -> Self {
        Self {
            observed: Arc::new(Mutex::new(Vec::new())),
            response_delay: Duration::from_millis(50),
        }
    }

    fn observed(&self) -> Vec<Observed> {
        self.observed.lock().unwrap().clone()
    }

    /// Wait until the handler has observed `count` requests.
    async fn wait_for(&self, count: usize) -> Vec<Observed> {
        for _ in 0..200 {
            let observed = self.observed();
            if observed.len() >= count {
                return observed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("handler never observed {count} request(s)");
    }
}

#[async_trait]
impl UploadHandler for Collector {
    async fn handle(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let mut stream = body.into_data_stream();
        let mut collected = Vec::new();
        let mut body_errored = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => collected.extend_from_slice(&chunk),
                Err(_) => {
                    body_errored = true;
                    break;
                }
            }
        }
        let record = Observed {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            content_length: parts
                .headers
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            upload_token_header: parts.headers.contains_key("upload-token"),
            body: collected.clone(),
            body_errored,
        };
        self.observed.lock().unwrap().push(record);
        tokio::time::sleep(self.response_delay).await;
        (StatusCode::OK, format!("stored {} bytes", collected.len())).into_response()
    }
}

fn setup() -> (Router, Collector) {
    setup_with(GatewayConfig::default())
}

fn setup_with(config: GatewayConfig) -> (Router, Collector) {
    let collector = Collector::new();
    let gateway = Gateway::new(config, Arc::new(collector.clone()));
    (gateway.router(), collector)
}

fn token() -> UploadToken {
    UploadToken::new(&b"T"[..])
}

fn resource_path(token: &UploadToken) -> String {
    format!("/uploads/{}", token.to_path_segment())
}

fn request(
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body.into()).unwrap()
}

fn header<'r>(response: &'r Response, name: &str) -> Option<&'r str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Request body that yields one chunk, pauses long enough for the
/// downstream drain to catch up, then fails like a dropped connection.
fn dropping_body(chunk: &'static [u8]) -> Body {
    Body::from_stream(futures_util::stream::unfold(0u8, move |state| async move {
        match state {
            0 => Some((Ok(Bytes::from_static(chunk)), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Some((
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )),
                    2,
                ))
            }
            _ => None,
        }
    }))
}

/// Request body that stalls briefly before yielding, keeping a producer
/// attached long enough for a racing append to collide with it.
fn slow_body(chunk: &'static [u8]) -> Body {
    Body::from_stream(futures_util::stream::unfold(0u8, move |state| async move {
        match state {
            0 => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Some((Ok::<_, std::io::Error>(Bytes::from_static(chunk)), 1))
            }
            _ => None,
        }
    }))
}

// ── S1: clean two-part upload ───────────────────────────────────────

#[tokio::test]
async fn clean_two_part_upload() {
    let (router, collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-length", "10"),
                ("upload-incomplete", "?1"),
            ],
            "01234",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-offset"), Some("5"));
    assert_eq!(header(&resp, "upload-incomplete"), Some("?1"));
    assert_eq!(
        header(&resp, "location"),
        Some(resource_path(&token).as_str())
    );

    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "5"), ("upload-incomplete", "?0")],
            "56789",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-offset"), Some("10"));
    assert_eq!(header(&resp, "upload-incomplete"), Some("?0"));

    let observed = collector.wait_for(1).await;
    assert_eq!(observed.len(), 1, "handler must see exactly one request");
    assert_eq!(observed[0].method, Method::POST);
    assert_eq!(observed[0].path, "/uploads");
    assert_eq!(observed[0].body, b"0123456789");
    // Upload-Length became the logical Content-Length; the upload headers
    // themselves were stripped.
    assert_eq!(observed[0].content_length.as_deref(), Some("10"));
    assert!(!observed[0].upload_token_header);
}

// ── S2: drop and resume ─────────────────────────────────────────────

#[tokio::test]
async fn drop_and_resume() {
    let (router, collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-incomplete", "?1"),
            ],
            dropping_body(b"abc"),
        ))
        .await
        .unwrap();
    // Truthful partial answer: three bytes made it downstream before the
    // transport died.
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-offset"), Some("3"));
    assert_eq!(header(&resp, "upload-incomplete"), Some("?1"));

    let resp = router
        .clone()
        .oneshot(request(
            Method::HEAD,
            &resource_path(&token),
            &[],
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&resp, "upload-offset"), Some("3"));
    assert_eq!(header(&resp, "upload-incomplete"), Some("?1"));
    assert_eq!(header(&resp, "cache-control"), Some("no-store"));

    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "3"), ("upload-incomplete", "?0")],
            "defghi",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-offset"), Some("9"));

    let observed = collector.wait_for(1).await;
    assert_eq!(observed[0].body, b"abcdefghi");
    assert!(!observed[0].body_errored);
}

// ── S3: offset mismatch ─────────────────────────────────────────────

#[tokio::test]
async fn offset_mismatch_conflicts() {
    let (router, collector) = setup();
    let token = token();

    // Single-shot creation: the creating transaction carries the
    // application's final response.
    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[("upload-token", &token.to_field_value())],
            "xyz",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "upload-offset"), Some("3"));
    assert_eq!(header(&resp, "upload-incomplete"), Some("?0"));
    assert_eq!(collector.wait_for(1).await[0].body, b"xyz");

    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "1")],
            "more",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    // The conflict reports the real offset so the client can resume.
    assert_eq!(header(&resp, "upload-offset"), Some("3"));
}

// ── S4: cancel ──────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_then_append_is_gone() {
    let (router, _collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-incomplete", "?1"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = router
        .clone()
        .oneshot(request(
            Method::DELETE,
            &resource_path(&token),
            &[],
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "3")],
            "def",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GONE);
}

// ── S5: interop version mismatch ────────────────────────────────────

#[tokio::test]
async fn interop_version_mismatch_fails_precondition() {
    let (router, _collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-draft-interop-version", "3"),
                ("upload-incomplete", "?1"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-draft-interop-version"), Some("3"));

    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[
                ("upload-offset", "3"),
                ("upload-draft-interop-version", "4"),
            ],
            "def",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(header(&resp, "upload-draft-interop-version"), Some("3"));

    // Offset retrieval enforces agreement too.
    let resp = router
        .clone()
        .oneshot(request(
            Method::HEAD,
            &resource_path(&token),
            &[("upload-draft-interop-version", "4")],
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

// ── S6: concurrent appends ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_appends_have_one_winner() {
    let (router, collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-incomplete", "?1"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "upload-offset"), Some("3"));

    let patch = |body: Body| {
        router.clone().oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "3"), ("upload-incomplete", "?0")],
            body,
        ))
    };
    let (a, b) = tokio::join!(patch(slow_body(b"def")), patch(slow_body(b"def")));
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut statuses = [a.status(), b.status()];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(
        statuses,
        [StatusCode::CREATED, StatusCode::CONFLICT],
        "exactly one append must win"
    );

    let observed = collector.wait_for(1).await;
    assert_eq!(observed[0].body, b"abcdef");
}

// ── Passthrough and edge cases ──────────────────────────────────────

#[tokio::test]
async fn non_upload_requests_pass_through() {
    let (router, collector) = setup();

    let resp = router
        .clone()
        .oneshot(request(Method::GET, "/api/things", &[], Body::empty()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // POST to the collection without a token is not resumable either.
    let resp = router
        .clone()
        .oneshot(request(Method::POST, "/uploads", &[], "plain"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let observed = collector.wait_for(2).await;
    assert_eq!(observed[0].method, Method::GET);
    assert_eq!(observed[0].path, "/api/things");
    assert_eq!(observed[1].body, b"plain");
}

#[tokio::test]
async fn malformed_header_is_bad_request() {
    let (router, _collector) = setup();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-offset", "not-a-number"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Nothing was registered: a follow-up HEAD misses.
    let resp = router
        .clone()
        .oneshot(request(
            Method::HEAD,
            &resource_path(&token),
            &[],
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn append_to_unknown_token_is_not_found() {
    let (router, _collector) = setup();
    let resp = router
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token()),
            &[("upload-offset", "0")],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn token_reuse_is_rejected_by_default() {
    let (router, _collector) = setup();
    let token = token();

    let create = || {
        request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-incomplete", "?1"),
            ],
            "abc",
        )
    };
    let resp = router.clone().oneshot(create()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = router.clone().oneshot(create()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn header_and_path_token_must_agree() {
    let (router, _collector) = setup();
    let other = UploadToken::new(&b"other"[..]);

    let resp = router
        .oneshot(request(
            Method::PATCH,
            &resource_path(&other),
            &[
                ("upload-token", &token().to_field_value()),
                ("upload-offset", "0"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn creation_with_nonzero_offset_rejected() {
    let (router, _collector) = setup();
    let resp = router
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token().to_field_value()),
                ("upload-offset", "4"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Held handler response ───────────────────────────────────────────

/// Handler that answers immediately without reading the body: the upload
/// concludes early and the response is held for the next transaction.
struct EarlyResponder;

#[async_trait]
impl UploadHandler for EarlyResponder {
    async fn handle(&self, _request: Request<Body>) -> Response {
        (StatusCode::UNPROCESSABLE_ENTITY, "rejected early").into_response()
    }
}

#[tokio::test]
async fn early_handler_response_is_held_for_next_append() {
    let gateway = Gateway::new(GatewayConfig::default(), Arc::new(EarlyResponder));
    let router = gateway.router();
    let token = token();

    let resp = router
        .clone()
        .oneshot(request(
            Method::POST,
            "/uploads",
            &[
                ("upload-token", &token.to_field_value()),
                ("upload-incomplete", "?1"),
            ],
            "abc",
        ))
        .await
        .unwrap();
    // The creating transaction closed cleanly before the early response
    // necessarily landed; either the partial 201 or the held response is a
    // valid answer depending on timing.
    assert!(
        resp.status() == StatusCode::CREATED
            || resp.status() == StatusCode::UNPROCESSABLE_ENTITY
    );

    if resp.status() == StatusCode::CREATED {
        // Give the handler task time to finish, then collect the held
        // response on the next append.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let resp = router
            .clone()
            .oneshot(request(
                Method::PATCH,
                &resource_path(&token),
                &[("upload-offset", "3")],
                "def",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // Either way the upload is concluded: later appends miss entirely.
    let resp = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &resource_path(&token),
            &[("upload-offset", "3")],
            "ghi",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
