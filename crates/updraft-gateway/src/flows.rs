//! The five protocol flows.
//!
//! Creation (with or without a draft interop version), append, offset
//! retrieval, and cancel. Creation and append share the body-streaming
//! loop, which is where the transfer-inactivity timeout and the
//! transport-failure handling live.

use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use futures_util::StreamExt;
use http::Request;
use tokio::time::timeout;
use tracing::{debug, warn};
use updraft_core::RegistryEntry;
use updraft_core::{
    ProducerGuard, ProtocolError, TerminateReason, Upload, UploadState, UploadToken,
};
use updraft_field::UploadFields;

use crate::gateway::{Gateway, UploadEntry};
use crate::respond;

impl Gateway {
    /// Create-with-upload and create-with-draft-interop: register the
    /// record, spawn the downstream handler, stream the creation body.
    pub(crate) async fn create(
        self: &Arc<Self>,
        request: Request<Body>,
        fields: UploadFields,
        token: UploadToken,
    ) -> Response {
        if let Some(requested) = fields.offset {
            if requested != 0 {
                return respond::error(&ProtocolError::CreationOffset { requested }, None);
            }
        }

        let make = || {
            UploadEntry::new(Upload::new(
                token.clone(),
                fields.length,
                fields.interop_version,
                self.config().max_buffered_bytes,
            ))
        };
        let entry = match self.registry().find_or_create(&token, make) {
            Ok((entry, _created)) => entry,
            Err(err) => return respond::error(&err, None),
        };

        let (parts, body) = request.into_parts();
        let guard =
            match entry
                .record()
                .attach_producer(0, fields.length, fields.interop_version)
            {
                Ok(guard) => guard,
                Err(err) => return respond::error(&err, Some(entry.record())),
            };

        self.spawn_downstream(&entry, parts);
        debug!(token = %token, interop = ?fields.interop_version, "upload created");

        let location = Some(self.resource_location(&token));
        self.stream_body(entry, guard, body, &fields, true, location)
            .await
    }

    /// Append: validate preconditions against the record, then stream the
    /// continuation.
    pub(crate) async fn append(
        self: &Arc<Self>,
        request: Request<Body>,
        fields: UploadFields,
        token: UploadToken,
    ) -> Response {
        let Some(offset) = fields.offset else {
            return respond::error(&ProtocolError::MissingOffset, None);
        };
        let Some(entry) = self.registry().find(&token) else {
            return respond::error(&ProtocolError::UnknownUpload, None);
        };

        // A handler that already returned concludes the upload: its
        // response was held for exactly this moment.
        if entry.response().is_ready() {
            return self.deliver_held(&entry);
        }

        let guard = match entry.record().attach_producer(
            offset,
            fields.length,
            fields.interop_version,
        ) {
            Ok(guard) => guard,
            Err(err) => return self.terminal_error(&entry, err),
        };

        let (_parts, body) = request.into_parts();
        self.stream_body(entry, guard, body, &fields, false, None)
            .await
    }

    /// Offset retrieval. Never attaches a producer.
    pub(crate) fn retrieve_offset(
        self: &Arc<Self>,
        fields: &UploadFields,
        token: &UploadToken,
    ) -> Response {
        let Some(entry) = self.registry().find(token) else {
            return respond::error(&ProtocolError::UnknownUpload, None);
        };
        if let Err(err) = check_interop(entry.record(), fields) {
            return respond::error(&err, Some(entry.record()));
        }

        if entry.response().is_ready() {
            let record = entry.record().clone();
            let offset = record.status().offset;
            if let Some(response) = entry.response().try_take() {
                self.registry().remove(token);
                return respond::deliver_head(response, &record, offset);
            }
        }

        let status = entry.record().status();
        if matches!(status.state, UploadState::Terminated) {
            return respond::error(
                &ProtocolError::Terminated(TerminateReason::Cancelled),
                Some(entry.record()),
            );
        }
        respond::offset_retrieval(entry.record(), &status)
    }

    /// Cancel: terminate the record, abort the downstream handler, leave a
    /// tombstone so later appends see 410 until the reaper purges it.
    pub(crate) fn cancel(
        self: &Arc<Self>,
        fields: &UploadFields,
        token: &UploadToken,
    ) -> Response {
        let Some(entry) = self.registry().find(token) else {
            return respond::error(&ProtocolError::UnknownUpload, None);
        };
        if let Err(err) = check_interop(entry.record(), fields) {
            return respond::error(&err, Some(entry.record()));
        }
        entry.evict(TerminateReason::Cancelled);
        debug!(token = %token, "upload cancelled");
        respond::cancelled(entry.record())
    }

    /// Stream a producer's request body into the record and build the
    /// transaction's response.
    ///
    /// Response selection on completion follows the draft split: the
    /// creating transaction carries the application's final response (it is
    /// the logical request), while a completing append answers with the
    /// protocol 201 unless the handler has already written its response —
    /// in that case the attached producer carries it.
    async fn stream_body(
        self: &Arc<Self>,
        entry: UploadEntry,
        mut guard: ProducerGuard,
        body: Body,
        fields: &UploadFields,
        is_create: bool,
        location: Option<String>,
    ) -> Response {
        let incomplete = fields.incomplete.unwrap_or(false);
        let inactivity = self.config().transfer_timeout;
        let mut stream = body.into_data_stream();

        loop {
            let item = match timeout(inactivity, stream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    let offset = guard.abort();
                    warn!(token = %entry.record().token(), offset, "transfer inactivity timeout");
                    return respond::error(&ProtocolError::TransferTimeout, Some(entry.record()));
                }
            };
            match item {
                None => break,
                Some(Ok(chunk)) => {
                    // No timeout here: admit suspends on the bounded buffer,
                    // and a slow downstream drain is backpressure, not
                    // producer inactivity.
                    if let Err(err) = guard.admit(chunk).await {
                        drop(guard);
                        return self.terminal_error(&entry, err);
                    }
                }
                Some(Err(transport)) => {
                    // Transport died mid-body. Buffered-but-undrained bytes
                    // are discarded; the record is back in Idle at the
                    // drained count, which is the truthful resumption
                    // point. The peer rarely sees this response.
                    let offset = guard.abort();
                    debug!(
                        token = %entry.record().token(),
                        offset,
                        error = %transport,
                        "producer transport failed mid-body"
                    );
                    return respond::partial(entry.record(), offset, location);
                }
            }
        }

        match guard.finish(incomplete).await {
            Err(err) => self.terminal_error(&entry, err),
            Ok(outcome) if outcome.complete => {
                if is_create {
                    // The creation transaction is the logical request; it
                    // waits for the handler's final response.
                    match entry.response().take().await {
                        Some(response) => {
                            respond::deliver(response, entry.record(), outcome.offset, location)
                        }
                        None => self.terminal_error(
                            &entry,
                            ProtocolError::Terminated(TerminateReason::Cancelled),
                        ),
                    }
                } else if entry.response().is_ready() {
                    // The handler wrote while this producer was attached.
                    let record = entry.record().clone();
                    match entry.response().try_take() {
                        Some(response) => {
                            respond::deliver(response, &record, outcome.offset, location)
                        }
                        None => respond::completed(&record, outcome.offset),
                    }
                } else {
                    // Protocol completion response; the handler's eventual
                    // response is held for a later retrieval.
                    respond::completed(entry.record(), outcome.offset)
                }
            }
            Ok(outcome) => {
                // Clean partial close. If the handler returned early in the
                // meantime the upload is concluded; otherwise answer with
                // the drained offset.
                if entry.response().is_ready() {
                    self.deliver_held(&entry)
                } else {
                    respond::partial(entry.record(), outcome.offset, location)
                }
            }
        }
    }

    /// Deliver the handler's held response and drop the upload from the
    /// registry: the upload is concluded, later appends get 404.
    fn deliver_held(&self, entry: &UploadEntry) -> Response {
        let record = entry.record().clone();
        let offset = record.status().offset;
        match entry.response().try_take() {
            Some(response) => {
                self.registry().remove(record.token());
                respond::deliver(response, &record, offset, None)
            }
            None => respond::error(
                &ProtocolError::Terminated(TerminateReason::HandlerFinished),
                Some(&record),
            ),
        }
    }

    /// A terminated record may owe the client the handler's final response
    /// rather than a bare 410.
    fn terminal_error(&self, entry: &UploadEntry, err: ProtocolError) -> Response {
        if matches!(err, ProtocolError::Terminated(_)) && entry.response().is_ready() {
            return self.deliver_held(entry);
        }
        respond::error(&err, Some(entry.record()))
    }
}

fn check_interop(record: &Arc<Upload>, fields: &UploadFields) -> Result<(), ProtocolError> {
    if fields.interop_version != record.interop_version() {
        return Err(ProtocolError::InteropMismatch {
            expected: record.interop_version(),
            requested: fields.interop_version,
        });
    }
    Ok(())
}
