//! Resumable-upload middleware for axum.
//!
//! Implements the server side of the IETF resumable-uploads draft on top
//! of an existing axum/hyper stack. The gateway intercepts requests that
//! advertise resumable-upload semantics, tracks upload state across
//! transactions, and replays a single logical request with one contiguous
//! body to the application handler — however many PATCHes, disconnects,
//! and resumptions the client needed to deliver it.
//!
//! # Flows
//!
//! | Request | Flow |
//! |---|---|
//! | `POST` collection + `Upload-Token` | create (optionally with a draft interop version) |
//! | `PATCH` upload + `Upload-Offset` | append |
//! | `HEAD` upload | offset retrieval |
//! | `DELETE` upload | cancel |
//! | anything else | passthrough, untouched |
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::body::Body;
//! use axum::response::{IntoResponse, Response};
//! use http::{Request, StatusCode};
//! use updraft_core::GatewayConfig;
//! use updraft_gateway::Gateway;
//!
//! async fn sink(request: Request<Body>) -> Response {
//!     // Read request.into_body() as one contiguous stream.
//!     StatusCode::OK.into_response()
//! }
//!
//! let gateway = Gateway::new(GatewayConfig::default(), Arc::new(sink));
//! let router = gateway.router();
//! # let _ = router;
//! ```

mod adapter;
mod flows;
mod gateway;
mod handler;
mod respond;

pub use gateway::{Gateway, UploadEntry};
pub use handler::UploadHandler;
pub use respond::{interim_resumption_response, INTERIM_RESUMPTION_STATUS};
