//! Gateway assembly and request dispatch.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::Router;
use http::{Method, Request};
use tokio::task::AbortHandle;
use tracing::debug;
use updraft_core::{
    spawn_reaper, GatewayConfig, ProtocolError, ReaperHandle, RegistryEntry, ResponseSlot,
    TerminateReason, Upload, UploadRegistry, UploadToken,
};
use updraft_field::{FieldError, UploadFields};

use crate::handler::UploadHandler;
use crate::respond;

/// What the gateway keeps per upload: the record itself, the slot holding
/// the downstream handler's response until a transaction can carry it, and
/// the handle for aborting the handler task on cancel.
#[derive(Clone)]
pub struct UploadEntry {
    record: Arc<Upload>,
    response: Arc<ResponseSlot<Response>>,
    abort: Arc<OnceLock<AbortHandle>>,
}

impl UploadEntry {
    pub(crate) fn new(record: Upload) -> Self {
        Self {
            record: Arc::new(record),
            response: Arc::new(ResponseSlot::new()),
            abort: Arc::new(OnceLock::new()),
        }
    }

    pub fn record(&self) -> &Arc<Upload> {
        &self.record
    }

    pub(crate) fn response(&self) -> &ResponseSlot<Response> {
        &self.response
    }

    pub(crate) fn response_slot(&self) -> Arc<ResponseSlot<Response>> {
        self.response.clone()
    }

    pub(crate) fn set_abort(&self, handle: AbortHandle) {
        let _ = self.abort.set(handle);
    }
}

impl RegistryEntry for UploadEntry {
    fn record(&self) -> &Arc<Upload> {
        &self.record
    }

    fn evict(&self, reason: TerminateReason) {
        self.record.terminate(reason);
        self.response.close();
        if let Some(handle) = self.abort.get() {
            handle.abort();
        }
    }
}

/// The resumable-upload middleware.
///
/// Sits between the HTTP stack and an [`UploadHandler`]. Requests that
/// address the upload collection with resumable-upload headers are run
/// through the protocol flows; everything else passes through to the
/// handler unmodified.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<UploadRegistry<UploadEntry>>,
    handler: Arc<dyn UploadHandler>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, handler: Arc<dyn UploadHandler>) -> Arc<Self> {
        let registry = Arc::new(UploadRegistry::new(config.token_reuse));
        Arc::new(Self {
            config,
            registry,
            handler,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<UploadRegistry<UploadEntry>> {
        &self.registry
    }

    pub(crate) fn handler(&self) -> Arc<dyn UploadHandler> {
        self.handler.clone()
    }

    /// Start the background idle reaper for this gateway's registry.
    pub fn spawn_reaper(&self) -> ReaperHandle {
        spawn_reaper(
            self.registry.clone(),
            self.config.idle_timeout,
            self.config.reap_interval,
        )
    }

    /// An axum router dispatching every request through this gateway.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(dispatch).with_state(self)
    }

    /// Whether this request addresses the upload collection or an upload
    /// resource beneath it.
    pub fn is_upload_resource(&self, request: &Request<Body>) -> bool {
        self.split_resource_path(request.uri().path()).is_some()
    }

    /// `Location` value for an upload resource.
    pub fn resource_location(&self, token: &UploadToken) -> String {
        format!(
            "{}/{}",
            self.config.normalized_collection_path(),
            token.to_path_segment()
        )
    }

    /// `Some(None)` for the collection itself, `Some(Some(segment))` for a
    /// single segment beneath it, `None` for unrelated paths.
    fn split_resource_path<'p>(&self, path: &'p str) -> Option<Option<&'p str>> {
        let collection = self.config.normalized_collection_path();
        let rest = path.trim_end_matches('/').strip_prefix(collection)?;
        match rest {
            "" => Some(None),
            _ => {
                let segment = rest.strip_prefix('/')?;
                if segment.is_empty() || segment.contains('/') {
                    return None;
                }
                Some(Some(segment))
            }
        }
    }

    /// Entry point: run the protocol flows for upload-resource requests,
    /// pass everything else through.
    pub async fn handle(self: &Arc<Self>, request: Request<Body>) -> Response {
        let Some(path_segment) = self.split_resource_path(request.uri().path()) else {
            return self.passthrough(request).await;
        };

        let fields = match UploadFields::from_headers(request.headers()) {
            Ok(fields) => fields,
            Err(err) => return respond::error(&ProtocolError::from(err), None),
        };

        let path_token = match path_segment.map(UploadToken::from_path_segment).transpose() {
            Ok(token) => token,
            Err(err) => return respond::error(&ProtocolError::from(err), None),
        };

        let token = match (fields.token.clone(), path_token) {
            (Some(header), Some(path)) if header != path => {
                return respond::error(
                    &ProtocolError::from(FieldError::TokenMismatch),
                    None,
                );
            }
            (Some(header), _) => header,
            (None, Some(path)) => path,
            (None, None) => return self.passthrough(request).await,
        };

        match request.method() {
            &Method::POST => self.create(request, fields, token).await,
            &Method::PATCH => self.append(request, fields, token).await,
            &Method::HEAD => self.retrieve_offset(&fields, &token),
            &Method::DELETE => self.cancel(&fields, &token),
            _ => self.passthrough(request).await,
        }
    }

    pub(crate) async fn passthrough(&self, request: Request<Body>) -> Response {
        debug!(method = %request.method(), path = request.uri().path(), "passthrough");
        self.handler.handle(request).await
    }
}

async fn dispatch(State(gateway): State<Arc<Gateway>>, request: Request<Body>) -> Response {
    gateway.handle(request).await
}
